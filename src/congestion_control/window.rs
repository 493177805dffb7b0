// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Window based congestion control (AIMD / BIC / CUBIC).
//!
//! All three algorithms drive one shared request window: acks grow it,
//! timeouts and congestion marks shrink it. They differ only in the shape
//! of the growth curve and the decrease rule, following TCP Reno, BIC-TCP
//! and CUBIC respectively.

use std::time::Instant;

use log::*;

/// Cubic constant C.
///
/// Determines the aggressiveness of the cubic growth curve.
/// See RFC 8312 Section 5.
const CUBIC_C: f64 = 0.4;

/// Regular TCP behavior (including slow start) until this window size.
const BIC_LOW_WINDOW: f64 = 14.0;

/// The maximum (linear) increase of BIC per ack round. Should be between 8
/// and 64.
const BIC_MAX_INCREMENT: f64 = 16.0;

/// Tolerance when comparing the window against the BIC maximum, to absorb
/// floating point noise.
const BIC_EPSILON: f64 = 0.00001;

/// Relative distance below the last W_max required for CUBIC fast
/// convergence, in percent.
/// See RFC 8312 Section 4.6.
const FAST_CONV_DIFF: f64 = 1.0;

/// Window based congestion control configuration.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Initial window size. The window never falls below it.
    pub initial_window: f64,

    /// Multiplicative decrease factor for AIMD.
    pub beta: f64,

    /// Multiplicative decrease factor for CUBIC and BIC.
    pub cubic_beta: f64,

    /// Suppress decreases until the highest acked sequence passes the
    /// recorded decrease point (conservative window adaptation).
    pub use_cwa: bool,

    /// Fraction of an RTT added to the decrease point on each decrease.
    pub add_rtt_suppress: f64,

    /// Whether a congestion mark triggers a window decrease.
    pub react_to_congestion_marks: bool,

    /// Enable CUBIC fast convergence.
    pub use_cubic_fast_conv: bool,

    /// Reset the window to its initial size on timeout.
    pub reset_window_on_timeout: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            initial_window: 1.0,
            beta: 0.5,
            cubic_beta: 0.7,
            use_cwa: true,
            add_rtt_suppress: 0.5,
            react_to_congestion_marks: true,
            use_cubic_fast_conv: false,
            reset_window_on_timeout: false,
        }
    }
}

/// BIC binary search state.
#[derive(Debug, Default)]
struct BicState {
    /// Last minimum window.
    min_win: f64,

    /// Last maximum window.
    max_win: f64,

    /// Midpoint the binary search is probing toward.
    target_win: f64,

    /// Local increment during the BIC slow start sub-phase.
    ss_cwnd: f64,

    /// Window value at which the local increment doubles.
    ss_target: f64,

    /// Whether the BIC slow start sub-phase is active.
    is_ss: bool,
}

/// CUBIC growth curve state.
#[derive(Debug)]
struct CubicState {
    /// Window size just before the last decrease.
    w_max: f64,

    /// W_max before the last update, used by fast convergence.
    last_w_max: f64,

    /// Time of the last decrease.
    last_decrease: Instant,
}

/// Per-algorithm growth state.
#[derive(Debug)]
enum Curve {
    Aimd,
    Bic(BicState),
    Cubic(CubicState),
}

/// AIMD / BIC / CUBIC window state machine.
#[derive(Debug)]
pub struct WindowCc {
    /// Configuration.
    config: WindowConfig,

    /// Current request window.
    window: f64,

    /// Slow start threshold.
    ssthresh: f64,

    /// Requests currently in flight.
    in_flight: u64,

    /// Highest acknowledged sequence seen so far.
    high_ack: u64,

    /// Decrease point: no further decrease until `high_ack` passes it.
    recovery_point: f64,

    /// Algorithm specific state.
    curve: Curve,
}

impl WindowCc {
    pub fn new_aimd(config: WindowConfig) -> Self {
        Self::new(config, Curve::Aimd)
    }

    pub fn new_bic(config: WindowConfig) -> Self {
        Self::new(
            config,
            Curve::Bic(BicState {
                max_win: f64::MAX,
                ..BicState::default()
            }),
        )
    }

    pub fn new_cubic(config: WindowConfig, now: Instant) -> Self {
        Self::new(
            config,
            Curve::Cubic(CubicState {
                w_max: 0.0,
                last_w_max: 0.0,
                last_decrease: now,
            }),
        )
    }

    fn new(config: WindowConfig, curve: Curve) -> Self {
        Self {
            window: config.initial_window,
            ssthresh: f64::MAX,
            in_flight: 0,
            high_ack: 0,
            recovery_point: 0.0,
            config,
            curve,
        }
    }

    pub fn name(&self) -> &str {
        match self.curve {
            Curve::Aimd => "AIMD",
            Curve::Bic(_) => "BIC",
            Curve::Cubic(_) => "CUBIC",
        }
    }

    /// Current window size.
    pub fn window(&self) -> f64 {
        self.window
    }

    /// Current slow start threshold.
    pub fn ssthresh(&self) -> f64 {
        self.ssthresh
    }

    /// Requests currently in flight.
    pub fn in_flight(&self) -> u64 {
        self.in_flight
    }

    /// Whether another request fits into the window.
    pub fn can_send(&self) -> bool {
        (self.in_flight as f64) < self.window
    }

    pub fn on_sent(&mut self) {
        self.in_flight += 1;
    }

    /// Process an acknowledgement for `seq`.
    ///
    /// A congestion mark triggers a decrease (if configured to react),
    /// otherwise the window grows. `next_seq` is the next fresh sequence to
    /// be assigned, used to place the decrease point.
    pub fn on_ack(&mut self, seq: u64, next_seq: u64, congestion_marked: bool, now: Instant) {
        if self.high_ack < seq {
            self.high_ack = seq;
        }

        if congestion_marked {
            trace!("{} congestion mark received seq={}", self.name(), seq);
            if self.config.react_to_congestion_marks {
                self.decrease(next_seq, now);
            }
        } else {
            self.increase(now);
        }

        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Release the in-flight slot for a negatively acknowledged request.
    /// A nack by itself is not a congestion signal.
    pub fn on_nack(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Process a timeout: decrease the window and release the in-flight slot.
    pub fn on_timeout(&mut self, next_seq: u64, now: Instant) {
        self.decrease(next_seq, now);
        if self.config.reset_window_on_timeout {
            self.window = self.config.initial_window;
        }
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    fn increase(&mut self, now: Instant) {
        match &mut self.curve {
            Curve::Aimd => {
                if self.window < self.ssthresh {
                    self.window += 1.0;
                } else {
                    self.window += 1.0 / self.window;
                }
            }
            Curve::Bic(bic) => {
                if self.window < BIC_LOW_WINDOW {
                    // Normal TCP AIMD behavior.
                    if self.window < self.ssthresh {
                        self.window += 1.0;
                    } else {
                        self.window += 1.0 / self.window;
                    }
                } else if !bic.is_ss {
                    // Binary increase toward the target window, additive
                    // increase while the target is further than the maximum
                    // increment.
                    if bic.target_win - self.window < BIC_MAX_INCREMENT {
                        self.window += (bic.target_win - self.window) / self.window;
                    } else {
                        self.window += BIC_MAX_INCREMENT / self.window;
                    }

                    if self.window + BIC_EPSILON < bic.max_win {
                        bic.min_win = self.window;
                        bic.target_win = (bic.max_win + bic.min_win) / 2.0;
                    } else {
                        // Within epsilon of the maximum: switch into the BIC
                        // slow start sub-phase.
                        bic.is_ss = true;
                        bic.ss_cwnd = 1.0;
                        bic.ss_target = self.window + 1.0;
                        bic.max_win = f64::MAX;
                    }
                } else {
                    // BIC slow start: the local increment doubles each time
                    // the window passes its target, until it saturates.
                    self.window += bic.ss_cwnd / self.window;
                    if self.window >= bic.ss_target {
                        bic.ss_cwnd *= 2.0;
                        bic.ss_target = self.window + bic.ss_cwnd;
                    }
                    if bic.ss_cwnd >= BIC_MAX_INCREMENT {
                        bic.is_ss = false;
                    }
                }
            }
            Curve::Cubic(cubic) => {
                // Time since the last congestion event, in seconds.
                let t = now.saturating_duration_since(cubic.last_decrease).as_secs_f64();

                // K = cubic_root(W_max*(1-beta_cubic)/C)  (RFC 8312 Eq. 2)
                let k = (cubic.w_max * (1.0 - self.config.cubic_beta) / CUBIC_C).cbrt();

                // W_cubic(t) = C*(t-K)^3 + W_max  (RFC 8312 Eq. 1)
                let w_cubic = CUBIC_C * (t - k).powi(3) + cubic.w_max;

                if self.window < self.ssthresh {
                    self.window += 1.0;
                } else {
                    let cubic_increment = (w_cubic - self.window).max(0.0);
                    self.window += cubic_increment / self.window;
                }
            }
        }
    }

    /// Multiplicative decrease, guarded by the RTT suppression rule: at most
    /// one decrease per RTT while conservative window adaptation is on.
    fn decrease(&mut self, next_seq: u64, now: Instant) {
        if self.config.use_cwa && (self.high_ack as f64) <= self.recovery_point {
            return;
        }

        let diff = next_seq.saturating_sub(self.high_ack) as f64;
        self.recovery_point = next_seq as f64 + self.config.add_rtt_suppress * diff;

        match &mut self.curve {
            Curve::Aimd => {
                self.ssthresh = self.window * self.config.beta;
                self.window = self.ssthresh;
            }
            Curve::Bic(bic) => {
                if self.window >= BIC_LOW_WINDOW {
                    let prev_max = bic.max_win;
                    bic.max_win = self.window;
                    self.window *= self.config.cubic_beta;
                    bic.min_win = self.window;
                    if prev_max > bic.max_win {
                        // Fast convergence.
                        bic.max_win = (bic.max_win + bic.min_win) / 2.0;
                    }
                    bic.target_win = (bic.max_win + bic.min_win) / 2.0;
                } else {
                    // Normal TCP decrease.
                    self.ssthresh = self.window * self.config.cubic_beta;
                    self.window = self.ssthresh;
                }
            }
            Curve::Cubic(cubic) => {
                // A flow remembers the last value of W_max before updating it
                // for the current congestion event.
                // See RFC 8312 Section 4.6.
                if self.config.use_cubic_fast_conv
                    && self.window < cubic.last_w_max * (1.0 - FAST_CONV_DIFF / 100.0)
                {
                    cubic.last_w_max = self.window;
                    cubic.w_max = self.window * (1.0 + self.config.cubic_beta) / 2.0;
                } else {
                    cubic.last_w_max = self.window;
                    cubic.w_max = self.window;
                }

                self.ssthresh = (self.window * self.config.cubic_beta).max(self.config.initial_window);
                self.window = self.ssthresh;
                cubic.last_decrease = now;
            }
        }

        // The window cannot be reduced below its initial size.
        if self.window < self.config.initial_window {
            self.window = self.config.initial_window;
        }

        trace!(
            "{} window decrease window={:.3} ssthresh={:.3}",
            self.name(),
            self.window,
            self.ssthresh
        );
    }
}
