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

use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

/// Smoothing gain applied to the estimation error.
/// See RFC 6298 Section 2 (alpha = 1/8).
const GAIN: f64 = 0.125;

/// Smoothing gain applied to the variance error.
/// See RFC 6298 Section 2 (beta = 1/4).
const GAIN2: f64 = 0.25;

/// Upper bound of the RTO backoff multiplier.
const MAX_MULTIPLIER: u16 = 64;

/// How an acknowledgement is matched against the sent history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Acking sequence N acknowledges every history entry whose coverage
    /// ends at or before N.
    Cumulative,

    /// Acking sequence N acknowledges exactly the entry sent for N. Used by
    /// sessions where each request is answered individually.
    Exact,
}

/// A record of one sent request range awaiting acknowledgement.
#[derive(Debug, Clone)]
struct RttHistory {
    /// First sequence number covered by this entry.
    seq: u64,

    /// Number of sequences covered.
    count: u64,

    /// Time the range was (first) sent.
    time: Instant,

    /// Set once any sequence in the range has been retransmitted. Flagged
    /// entries never produce an RTT sample (Karn's algorithm).
    retx: bool,
}

/// Mean-deviation RTT estimation over a sequence-keyed send history.
///
/// The filter follows RFC 6298: a smoothed estimate plus a mean deviation,
/// with an exponential backoff multiplier applied to the retransmission
/// timeout while losses persist.
#[derive(Debug)]
pub struct RttEstimator {
    /// Ack matching mode.
    mode: AckMode,

    /// Next expected first-transmission sequence.
    next: u64,

    /// Current smoothed RTT estimate.
    estimate: Duration,

    /// Mean deviation of the RTT samples.
    variance: Duration,

    /// Number of valid samples fed into the filter.
    n_samples: u64,

    /// RTO backoff multiplier, doubled on timeout up to [`MAX_MULTIPLIER`].
    multiplier: u16,

    /// Minimum value of the timeout.
    min_rto: Duration,

    /// Maximum value of the timeout.
    max_rto: Duration,

    /// Initial estimate, restored on reset.
    initial_estimate: Duration,

    /// Sent ranges in send order, pruned from the front as acks arrive.
    history: VecDeque<RttHistory>,
}

impl RttEstimator {
    pub fn new(mode: AckMode, initial_estimate: Duration) -> Self {
        Self {
            mode,
            next: 0,
            estimate: initial_estimate,
            variance: Duration::ZERO,
            n_samples: 0,
            multiplier: 1,
            min_rto: crate::MIN_RTO,
            max_rto: crate::MAX_RTO,
            initial_estimate,
            history: VecDeque::new(),
        }
    }

    /// Return the current smoothed RTT estimate.
    pub fn estimate(&self) -> Duration {
        self.estimate
    }

    /// Return the mean deviation of the RTT samples.
    pub fn variance(&self) -> Duration {
        self.variance
    }

    /// Return the current backoff multiplier.
    pub fn multiplier(&self) -> u16 {
        self.multiplier
    }

    /// Return the number of valid samples observed so far.
    pub fn samples(&self) -> u64 {
        self.n_samples
    }

    /// Update the minimum RTO bound.
    pub fn set_min_rto(&mut self, min_rto: Duration) {
        self.min_rto = min_rto;
    }

    /// Update the maximum RTO bound.
    pub fn set_max_rto(&mut self, max_rto: Duration) {
        self.max_rto = max_rto;
    }

    /// Note that a particular sequence has been sent.
    ///
    /// A first transmission appends a history entry and advances the next
    /// expected cursor. A retransmission marks the covering entry instead,
    /// extending its coverage if the retransmission reaches beyond it.
    pub fn on_sent(&mut self, seq: u64, count: u64, now: Instant) {
        match self.mode {
            AckMode::Cumulative => {
                if seq == self.next {
                    self.history.push_back(RttHistory {
                        seq,
                        count,
                        time: now,
                        retx: false,
                    });
                    self.next = seq + count;
                } else {
                    for entry in self.history.iter_mut() {
                        if seq >= entry.seq && seq < entry.seq + entry.count {
                            entry.retx = true;
                            if seq + count > self.next {
                                self.next = seq + count;
                                entry.count = seq + count - entry.seq;
                            }
                            break;
                        }
                    }
                }
            }
            AckMode::Exact => {
                for entry in self.history.iter_mut() {
                    if seq == entry.seq {
                        entry.retx = true;
                        return;
                    }
                }
                self.history.push_back(RttHistory {
                    seq,
                    count,
                    time: now,
                    retx: false,
                });
            }
        }
    }

    /// Note that an acknowledgement for `seq` has been received.
    ///
    /// Returns the elapsed time for the covering entry, or zero when the
    /// history is empty, the sequence is unknown, or the entry was touched
    /// by a retransmission.
    pub fn on_ack(&mut self, seq: u64, now: Instant) -> Duration {
        if self.history.is_empty() {
            return Duration::ZERO;
        }

        let mut elapsed = Duration::ZERO;
        match self.mode {
            AckMode::Cumulative => {
                let front = &self.history[0];
                if !front.retx && seq >= front.seq + front.count {
                    elapsed = now.saturating_duration_since(front.time);
                    self.measurement(elapsed);
                    self.reset_multiplier();
                }

                // Remove every entry whose coverage ends at or before the ack.
                while let Some(front) = self.history.front() {
                    if front.seq + front.count > seq {
                        break;
                    }
                    self.history.pop_front();
                }
            }
            AckMode::Exact => {
                if let Some(pos) = self.history.iter().position(|e| e.seq == seq) {
                    if !self.history[pos].retx {
                        elapsed = now.saturating_duration_since(self.history[pos].time);
                        self.measurement(elapsed);
                        self.reset_multiplier();
                    }
                    self.history.remove(pos);
                }
            }
        }

        elapsed
    }

    /// Feed a new sample into the smoothing filter.
    fn measurement(&mut self, sample: Duration) {
        if self.n_samples > 0 {
            let err = sample.as_secs_f64() - self.estimate.as_secs_f64();
            let estimate = self.estimate.as_secs_f64() + GAIN * err;
            let variance = self.variance.as_secs_f64() + GAIN2 * (err.abs() - self.variance.as_secs_f64());
            self.estimate = Duration::from_secs_f64(estimate.max(0.0));
            self.variance = Duration::from_secs_f64(variance.max(0.0));
        } else {
            self.estimate = sample;
            self.variance = sample / 2;
        }
        self.n_samples += 1;
    }

    /// Return the current retransmission timeout.
    ///
    /// RTO = clamp(mult * (estimate + 4 * variance), mult * min_rto, max_rto)
    pub fn rto(&self) -> Duration {
        let mult = self.multiplier as f64;
        let rto = mult * (self.estimate.as_secs_f64() + 4.0 * self.variance.as_secs_f64());
        let rto = rto.max(mult * self.min_rto.as_secs_f64());
        let rto = rto.min(self.max_rto.as_secs_f64());
        Duration::from_secs_f64(rto)
    }

    /// Double the backoff multiplier, up to [`MAX_MULTIPLIER`].
    pub fn backoff(&mut self) {
        self.multiplier = std::cmp::min(self.multiplier * 2, MAX_MULTIPLIER);
    }

    /// Reset the backoff multiplier after a valid sample.
    pub fn reset_multiplier(&mut self) {
        self.multiplier = 1;
    }

    /// Clear all history entries.
    pub fn clear_sent(&mut self) {
        self.next = 0;
        self.history.clear();
    }

    /// Reset the estimator to its initial state.
    pub fn reset(&mut self) {
        self.next = 0;
        self.estimate = self.initial_estimate;
        self.variance = Duration::ZERO;
        self.n_samples = 0;
        self.history.clear();
        self.reset_multiplier();
    }
}
