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

use core::str::FromStr;
use std::time::Duration;
use std::time::Instant;

use crate::Config;
use crate::Error;
use crate::Result;
pub use bbr::Bbr;
pub use bbr::BbrMode;
pub(crate) use bbr::PROBE_RTT_INTERVAL;
pub use qsccp::Qsccp;
pub use window::WindowCc;
pub use window::WindowConfig;

/// Available congestion control algorithm
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub enum CcAlgorithm {
    /// Classic additive-increase/multiplicative-decrease over a request
    /// window.
    Aimd,

    /// BIC grows the window by binary search towards the window size in use
    /// before the last decrease.
    Bic,

    /// CUBIC uses a cubic function instead of a linear window increase
    /// function to improve scalability and stability under fast and
    /// long-distance networks.
    #[default]
    Cubic,

    /// BBR uses recent measurements of delivery rate and round-trip time to
    /// build an explicit model of the network path, which then bounds the
    /// in-flight volume and paces request emissions.
    Bbr,

    /// QSCCP follows rate grants carried by responses instead of probing
    /// for capacity itself.
    Qsccp,
}

impl FromStr for CcAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<CcAlgorithm> {
        if algor.eq_ignore_ascii_case("aimd") {
            Ok(CcAlgorithm::Aimd)
        } else if algor.eq_ignore_ascii_case("bic") {
            Ok(CcAlgorithm::Bic)
        } else if algor.eq_ignore_ascii_case("cubic") {
            Ok(CcAlgorithm::Cubic)
        } else if algor.eq_ignore_ascii_case("bbr") {
            Ok(CcAlgorithm::Bbr)
        } else if algor.eq_ignore_ascii_case("qsccp") {
            Ok(CcAlgorithm::Qsccp)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// Outcome of asking a controller whether the next request may go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDecision {
    /// Send immediately.
    Now,

    /// Send after the given pacing delay.
    After(Duration),

    /// Do not send; wait for an acknowledgement or a timer to change the
    /// controller state.
    Blocked,
}

/// The congestion controller driving a session.
///
/// The three families differ in what an acknowledgement means to them, so
/// ack processing stays variant-specific; the operations every family
/// shares are dispatched here.
#[derive(Debug)]
pub enum Controller {
    /// Window based control (AIMD, BIC, CUBIC).
    Window(WindowCc),

    /// Model based control (BBR).
    Bbr(Bbr),

    /// Receiver-driven rate control (QSCCP).
    Qsccp(Qsccp),
}

impl Controller {
    /// Build the controller selected by the configuration.
    pub fn build(conf: &Config, now: Instant) -> Self {
        let window_conf = WindowConfig {
            initial_window: conf.initial_window,
            beta: conf.beta,
            cubic_beta: conf.cubic_beta,
            use_cwa: conf.use_cwa,
            add_rtt_suppress: conf.add_rtt_suppress,
            react_to_congestion_marks: conf.react_to_congestion_marks,
            use_cubic_fast_conv: conf.use_cubic_fast_conv,
            reset_window_on_timeout: conf.reset_window_on_timeout,
        };
        match conf.cc_algorithm {
            CcAlgorithm::Aimd => Controller::Window(WindowCc::new_aimd(window_conf)),
            CcAlgorithm::Bic => Controller::Window(WindowCc::new_bic(window_conf)),
            CcAlgorithm::Cubic => Controller::Window(WindowCc::new_cubic(window_conf, now)),
            CcAlgorithm::Bbr => Controller::Bbr(Bbr::new()),
            CcAlgorithm::Qsccp => Controller::Qsccp(Qsccp::new(conf.fixed_rate)),
        }
    }

    /// Name of congestion control algorithm.
    pub fn name(&self) -> &str {
        match self {
            Controller::Window(cc) => cc.name(),
            Controller::Bbr(cc) => cc.name(),
            Controller::Qsccp(cc) => cc.name(),
        }
    }

    /// Callback after a request was sent out.
    pub fn on_sent(&mut self) {
        match self {
            Controller::Window(cc) => cc.on_sent(),
            Controller::Bbr(cc) => cc.on_sent(),
            Controller::Qsccp(_) => {}
        }
    }

    /// Callback after a request timed out.
    pub fn on_request_timeout(&mut self, next_seq: u64, now: Instant) {
        match self {
            Controller::Window(cc) => cc.on_timeout(next_seq, now),
            Controller::Bbr(cc) => cc.on_timeout(),
            Controller::Qsccp(_) => {}
        }
    }

    /// Callback after a request was negatively acknowledged. Releases the
    /// in-flight slot without treating it as a congestion signal.
    pub fn on_nack(&mut self) {
        match self {
            Controller::Window(cc) => cc.on_nack(),
            Controller::Bbr(cc) => cc.on_timeout(),
            Controller::Qsccp(_) => {}
        }
    }

    /// Whether and when the next request may be sent, given the current
    /// controller state.
    pub fn send_decision(&self, payload_size: u64) -> SendDecision {
        match self {
            Controller::Window(cc) => {
                if cc.can_send() {
                    SendDecision::Now
                } else {
                    SendDecision::Blocked
                }
            }
            Controller::Bbr(cc) => cc.send_decision(payload_size),
            Controller::Qsccp(cc) => cc.send_decision(payload_size),
        }
    }
}

mod bbr;
mod qsccp;
mod window;
