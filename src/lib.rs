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

//! pullcc is a congestion control engine for pull-based request/response
//! protocols: the receiver emits sequenced requests and the network answers
//! each one with a single response. The crate decides *when* requests go
//! out; it never touches a socket.
//!
//! ## Design
//!
//! * **Sans-I/O**: a [`Session`] is driven entirely by its caller. Ask
//!   [`Session::timeout`] when the next timer is due, call
//!   [`Session::on_timeout`] at that time, feed deliveries in through the
//!   response/timeout/nack callbacks and drain [`Event`]s with
//!   [`Session::poll`]. `Event::SendRequest` marks the transport boundary.
//! * **Single-threaded**: all state transitions happen inside those entry
//!   points on one thread; there is no locking and no blocking wait.
//! * **Pluggable strategies**: window based AIMD/BIC/CUBIC, model based
//!   BBR, and receiver-driven QSCCP rate control, selected per session by
//!   [`CcAlgorithm`]. All strategies share the RTT estimation and
//!   retransmission machinery.

use std::time::Duration;

pub use crate::congestion_control::CcAlgorithm;
pub use crate::error::Error;
pub use crate::session::rtt::AckMode;
pub use crate::session::rtt::RttEstimator;
pub use crate::session::Event;
pub use crate::session::Session;
pub use crate::session::SessionStats;

/// A specialized [`Result`] type for quick returns.
pub type Result<T> = std::result::Result<T, Error>;

/// The default request lifetime advertised to the transport.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(4);

/// The default service class carried by each request.
const DEFAULT_SERVICE_CLASS: u8 = 5;

/// The default payload size hint, in bytes.
const DEFAULT_PAYLOAD_SIZE: u64 = 8624;

/// The default RTT estimate before the first sample.
const DEFAULT_INITIAL_RTT: Duration = Duration::from_secs(1);

/// Lower bound of the retransmission timeout.
/// See RFC 6298 Section 2.4 (a conservative engine floor, not the RFC's 1 s).
pub(crate) const MIN_RTO: Duration = Duration::from_millis(200);

/// Upper bound of the retransmission timeout.
pub(crate) const MAX_RTO: Duration = Duration::from_secs(200);

/// Period of the scan for expired outstanding requests.
pub(crate) const RETX_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// Period of the rate telemetry report.
pub(crate) const RATE_TRACE_INTERVAL: Duration = Duration::from_millis(500);

/// Configurations about a pull session.
#[derive(Clone)]
pub struct Config {
    /// Name prefix identifying the flow. Request names are formed by the
    /// transport from the prefix and the sequence number.
    prefix: String,

    /// First sequence number to request.
    start_seq: u64,

    /// One past the last sequence number to request, or None for an
    /// unbounded session.
    max_seq: Option<u64>,

    /// Request lifetime advertised to the transport.
    lifetime: Duration,

    /// Service class carried by each request.
    service_class: u8,

    /// Payload size hint in bytes, used for pacing arithmetic.
    payload_size: u64,

    /// Congestion control algorithm.
    cc_algorithm: CcAlgorithm,

    /// Fixed send rate in bytes per second, overriding receiver-driven
    /// feedback.
    fixed_rate: Option<u64>,

    /// Greedy send rate in bytes per second, activated after
    /// `greedy_delay`.
    greedy_rate: Option<u64>,

    /// Delay before the greedy rate takes effect.
    greedy_delay: Duration,

    /// Delay before the first request is sent.
    delay_start: Duration,

    /// Unconditional session stop after this delay, if set.
    hard_stop: Option<Duration>,

    /// Initial request window. The window never falls below it.
    initial_window: f64,

    /// Multiplicative decrease factor for AIMD.
    beta: f64,

    /// Multiplicative decrease factor for CUBIC and BIC.
    cubic_beta: f64,

    /// Suppress window decreases until the highest acked sequence passes
    /// the recorded decrease point (conservative window adaptation).
    use_cwa: bool,

    /// Fraction of an RTT added to the decrease point on each decrease.
    add_rtt_suppress: f64,

    /// Whether a congestion mark triggers a window decrease.
    react_to_congestion_marks: bool,

    /// Enable CUBIC fast convergence.
    use_cubic_fast_conv: bool,

    /// Reset the window to its initial size on timeout.
    reset_window_on_timeout: bool,

    /// RTT estimate before the first sample.
    initial_rtt: Duration,

    /// Lower bound of the retransmission timeout.
    min_rto: Duration,

    /// Upper bound of the retransmission timeout.
    max_rto: Duration,
}

impl Config {
    /// Create default configuration.
    ///
    /// The configuration may be customized by calling related set methods.
    pub fn new() -> Self {
        Self {
            prefix: String::from("/"),
            start_seq: 0,
            max_seq: None,
            lifetime: DEFAULT_LIFETIME,
            service_class: DEFAULT_SERVICE_CLASS,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            cc_algorithm: CcAlgorithm::default(),
            fixed_rate: None,
            greedy_rate: None,
            greedy_delay: Duration::ZERO,
            delay_start: Duration::ZERO,
            hard_stop: None,
            initial_window: 1.0,
            beta: 0.5,
            cubic_beta: 0.7,
            use_cwa: true,
            add_rtt_suppress: 0.5,
            react_to_congestion_marks: true,
            use_cubic_fast_conv: false,
            reset_window_on_timeout: false,
            initial_rtt: DEFAULT_INITIAL_RTT,
            min_rto: MIN_RTO,
            max_rto: MAX_RTO,
        }
    }

    /// Set the name prefix identifying the flow.
    pub fn set_prefix(&mut self, prefix: &str) {
        self.prefix = prefix.to_string();
    }

    /// Set the first sequence number to request. Default is 0.
    pub fn set_start_seq(&mut self, v: u64) {
        self.start_seq = v;
    }

    /// Set one past the last sequence number to request. None, the
    /// default, leaves the session unbounded.
    pub fn set_max_seq(&mut self, v: Option<u64>) {
        self.max_seq = v;
    }

    /// Set the request lifetime advertised to the transport. Default is
    /// 4 seconds.
    pub fn set_lifetime(&mut self, v: Duration) {
        self.lifetime = v;
    }

    /// Set the service class carried by each request. Default is 5.
    pub fn set_service_class(&mut self, v: u8) {
        self.service_class = v;
    }

    /// Set the payload size hint in bytes. Default is 8624.
    pub fn set_payload_size(&mut self, v: u64) {
        self.payload_size = v;
    }

    /// Select the congestion control algorithm. Default is CUBIC.
    pub fn set_cc_algorithm(&mut self, v: CcAlgorithm) {
        self.cc_algorithm = v;
    }

    /// Set a fixed send rate in bytes per second, overriding
    /// receiver-driven feedback. Disabled by default.
    pub fn set_fixed_rate(&mut self, v: Option<u64>) {
        self.fixed_rate = v;
    }

    /// Set a greedy send rate in bytes per second, activated after the
    /// given delay. Disabled by default.
    pub fn set_greedy_rate(&mut self, v: Option<u64>, delay: Duration) {
        self.greedy_rate = v;
        self.greedy_delay = delay;
    }

    /// Set the delay before the first request is sent. Default is zero.
    pub fn set_delay_start(&mut self, v: Duration) {
        self.delay_start = v;
    }

    /// Stop the session unconditionally after the given delay. Disabled by
    /// default.
    pub fn set_hard_stop(&mut self, v: Option<Duration>) {
        self.hard_stop = v;
    }

    /// Set the initial request window. Default is 1.
    pub fn set_initial_window(&mut self, v: f64) {
        self.initial_window = v;
    }

    /// Set the AIMD multiplicative decrease factor. Default is 0.5.
    pub fn set_beta(&mut self, v: f64) {
        self.beta = v;
    }

    /// Set the CUBIC/BIC multiplicative decrease factor. Default is 0.7.
    pub fn set_cubic_beta(&mut self, v: f64) {
        self.cubic_beta = v;
    }

    /// Enable or disable conservative window adaptation. Enabled by
    /// default.
    pub fn set_use_cwa(&mut self, v: bool) {
        self.use_cwa = v;
    }

    /// Set the fraction of an RTT added to the decrease point on each
    /// window decrease. Default is 0.5.
    pub fn set_add_rtt_suppress(&mut self, v: f64) {
        self.add_rtt_suppress = v;
    }

    /// Enable or disable window decreases on congestion marks. Enabled by
    /// default.
    pub fn set_react_to_congestion_marks(&mut self, v: bool) {
        self.react_to_congestion_marks = v;
    }

    /// Enable or disable CUBIC fast convergence. Disabled by default.
    pub fn set_use_cubic_fast_conv(&mut self, v: bool) {
        self.use_cubic_fast_conv = v;
    }

    /// Reset the window to its initial size on timeout. Disabled by
    /// default.
    pub fn set_reset_window_on_timeout(&mut self, v: bool) {
        self.reset_window_on_timeout = v;
    }

    /// Set the RTT estimate used before the first sample. Default is
    /// 1 second.
    pub fn set_initial_rtt(&mut self, v: Duration) {
        self.initial_rtt = v;
    }

    /// Set the lower bound of the retransmission timeout. Default is
    /// 200 milliseconds.
    pub fn set_min_rto(&mut self, v: Duration) {
        self.min_rto = v;
    }

    /// Set the upper bound of the retransmission timeout. Default is
    /// 200 seconds.
    pub fn set_max_rto(&mut self, v: Duration) {
        self.max_rto = v;
    }

    /// Check the configuration for values no session can run with.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.payload_size == 0 {
            return Err(Error::InvalidConfig("zero payload size".into()));
        }
        if self.initial_window < 1.0 {
            return Err(Error::InvalidConfig("initial window below one".into()));
        }
        if !(0.0..=1.0).contains(&self.beta) || !(0.0..=1.0).contains(&self.cubic_beta) {
            return Err(Error::InvalidConfig("decrease factor out of range".into()));
        }
        if self.fixed_rate == Some(0) || self.greedy_rate == Some(0) {
            return Err(Error::InvalidConfig("zero send rate".into()));
        }
        if self.lifetime.is_zero() {
            return Err(Error::InvalidConfig("zero request lifetime".into()));
        }
        if self.min_rto > self.max_rto {
            return Err(Error::InvalidConfig("min rto above max rto".into()));
        }
        if let Some(max_seq) = self.max_seq {
            if max_seq <= self.start_seq {
                return Err(Error::InvalidConfig("empty sequence range".into()));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[path = "congestion_control/congestion_control.rs"]
pub mod congestion_control;

#[path = "session/session.rs"]
pub mod session;

pub mod error;
