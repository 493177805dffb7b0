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

//! QSCCP congestion control.
//!
//! Receiver-driven rate control: each response carries a target rate
//! computed by the network, and the sender converges to it with an
//! exponentially weighted moving average. There is no window and no
//! loss-based reaction.

use std::time::Duration;

use log::*;

use super::SendDecision;

/// Weight of the previous rate estimate in the EWMA update.
const RATE_SMOOTHING: f64 = 0.8;

/// Receiver-driven rate based congestion control.
#[derive(Debug, Default)]
pub struct Qsccp {
    /// Current send rate, in bytes per second. Zero until the first target
    /// rate arrives (or a fixed rate is configured).
    send_rate: f64,

    /// Fixed send rate overriding the feedback loop, in bytes per second.
    fixed_rate: Option<u64>,
}

impl Qsccp {
    pub fn new(fixed_rate: Option<u64>) -> Self {
        Self {
            send_rate: fixed_rate.map_or(0.0, |rate| rate as f64),
            fixed_rate,
        }
    }

    pub fn name(&self) -> &str {
        "QSCCP"
    }

    /// Current send rate in bytes per second.
    pub fn send_rate(&self) -> f64 {
        self.send_rate
    }

    /// Fold a target rate carried by a response into the send rate.
    ///
    /// The first target is adopted as-is, later targets move the rate by an
    /// EWMA. A configured fixed rate disables the feedback loop entirely.
    pub fn update_rate(&mut self, target_rate: u64) {
        if self.fixed_rate.is_some() {
            return;
        }
        let target = target_rate as f64;
        if self.send_rate == 0.0 {
            self.send_rate = target;
        } else {
            self.send_rate =
                RATE_SMOOTHING * self.send_rate + (1.0 - RATE_SMOOTHING) * target;
        }
        trace!(
            "{} rate update target_rate={} send_rate={:.0}",
            self.name(),
            target_rate,
            self.send_rate
        );
    }

    /// Switch to a fixed greedy rate, ignoring all further feedback.
    pub fn start_greedy(&mut self, rate: u64) {
        debug!("{} greedy start rate={}", self.name(), rate);
        self.fixed_rate = Some(rate);
        self.send_rate = rate as f64;
    }

    /// Decide when the next request may be sent.
    ///
    /// Sends are blocked until a rate is known. Once it is, the interval is
    /// `payload_size / send_rate`, widened by one nanosecond so the pace
    /// stays strictly below the granted rate.
    pub fn send_decision(&self, payload_size: u64) -> SendDecision {
        if self.send_rate <= 0.0 {
            return SendDecision::Blocked;
        }
        let nanos = payload_size as f64 * 1e9 / self.send_rate;
        SendDecision::After(Duration::from_nanos(nanos as u64 + 1))
    }
}
