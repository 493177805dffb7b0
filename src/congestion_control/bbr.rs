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

//! BBR congestion control.
//!
//! BBR builds an explicit model of the network path from two measurements:
//! the minimum observed round-trip time and the maximum observed delivery
//! rate. The model bounds the amount of data in flight (a gain over the
//! bandwidth-delay product) and spaces request emissions (a gain over the
//! estimated bandwidth).
//!
//! See <https://datatracker.ietf.org/doc/html/draft-cardwell-iccrg-bbr-congestion-control-00>.

use std::time::Duration;
use std::time::Instant;

use log::*;

use super::SendDecision;

/// BBRHighGain: the gain used in Startup for both the pacing gain and the
/// window gain, `2/ln(2)`, enough to double the sending rate each round.
const HIGH_GAIN: f64 = 2.0 / std::f64::consts::LN_2;

/// The pacing gain used while draining the queue built up in Startup,
/// `ln(2)/2`.
const DRAIN_GAIN: f64 = std::f64::consts::LN_2 / 2.0;

/// The number of phases in the ProbeBW pacing gain cycle.
const GAIN_CYCLE_LEN: u64 = 8;

/// In-flight cap while probing for the minimum RTT.
const PROBE_RTT_INFLIGHT_CAP: u64 = 4;

/// Fixed send cadence while the ProbeRTT in-flight cap is not yet reached.
const PROBE_RTT_SEND_INTERVAL: Duration = Duration::from_millis(250);

/// ProbeRTTDuration: upper bound on how long the ProbeRTT state holds.
const PROBE_RTT_DURATION: Duration = Duration::from_millis(200);

/// ProbeRTTInterval: minimum time interval between ProbeRTT states.
pub(crate) const PROBE_RTT_INTERVAL: Duration = Duration::from_secs(10);

/// BBR state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BbrMode {
    Startup,
    Drain,
    ProbeBw,
    ProbeRtt,
}

/// Rate based congestion control over a bandwidth/RTT path model.
#[derive(Debug)]
pub struct Bbr {
    /// Current state.
    mode: BbrMode,

    /// Minimum observed round-trip time, in seconds.
    min_rtt: f64,

    /// Maximum observed delivery rate, in bytes per second.
    max_bandwidth: f64,

    /// Gain applied to the estimated bandwidth when spacing sends.
    pacing_gain: f64,

    /// Gain applied to the BDP when capping the in-flight volume.
    cwnd_gain: f64,

    /// ProbeBW gain cycle round counter.
    round_count: u64,

    /// Requests currently in flight.
    in_flight: u64,
}

impl Bbr {
    pub fn new() -> Self {
        Self {
            mode: BbrMode::Startup,
            min_rtt: f64::MAX,
            max_bandwidth: 0.0,
            pacing_gain: HIGH_GAIN,
            cwnd_gain: HIGH_GAIN,
            round_count: 0,
            in_flight: 0,
        }
    }

    pub fn name(&self) -> &str {
        "BBR"
    }

    /// Current state.
    pub fn mode(&self) -> BbrMode {
        self.mode
    }

    /// Requests currently in flight.
    pub fn in_flight(&self) -> u64 {
        self.in_flight
    }

    /// Minimum observed round-trip time in seconds.
    pub fn min_rtt(&self) -> f64 {
        self.min_rtt
    }

    /// Maximum observed delivery rate in bytes per second.
    pub fn max_bandwidth(&self) -> f64 {
        self.max_bandwidth
    }

    /// Current pacing gain.
    pub fn pacing_gain(&self) -> f64 {
        self.pacing_gain
    }

    /// Bandwidth-delay product: the in-flight volume the path can sustain.
    pub fn bdp(&self) -> f64 {
        if self.max_bandwidth == 0.0 {
            return 0.0;
        }
        self.min_rtt * self.max_bandwidth
    }

    pub fn on_sent(&mut self) {
        self.in_flight += 1;
    }

    pub fn on_timeout(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Process an acknowledgement.
    ///
    /// Retransmitted requests update nothing but the in-flight counter. For
    /// a first transmission the RTT sample refreshes the path model, and the
    /// delivery rate over the request's lifetime either raises the bandwidth
    /// estimate or, while still in Startup, signals that the pipe is full
    /// and moves the state machine into Drain.
    #[allow(clippy::too_many_arguments)]
    pub fn on_ack(
        &mut self,
        retx: bool,
        rtt: Duration,
        delivered: u64,
        delivered_time: Instant,
        delivered_at_send: u64,
        delivered_time_at_send: Instant,
    ) {
        if !retx {
            let rtt = rtt.as_secs_f64();
            if rtt > 0.0 && rtt < self.min_rtt {
                self.min_rtt = rtt;
            }

            let interval = delivered_time
                .saturating_duration_since(delivered_time_at_send)
                .as_secs_f64();
            if interval > 0.0 {
                let delivery_rate = delivered.saturating_sub(delivered_at_send) as f64 / interval;
                if delivery_rate > self.max_bandwidth {
                    self.max_bandwidth = delivery_rate;
                } else if self.mode == BbrMode::Startup {
                    // First round without bandwidth growth: the pipe is
                    // full, drain the queue built up during Startup.
                    self.mode = BbrMode::Drain;
                    self.pacing_gain = DRAIN_GAIN;
                    debug!(
                        "{} enter Drain max_bandwidth={:.0} min_rtt={:.6}",
                        self.name(),
                        self.max_bandwidth,
                        self.min_rtt
                    );
                }
            }
        }

        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Whether the Drain state is over: the in-flight volume has fallen
    /// below the BDP.
    pub fn should_exit_drain(&self) -> bool {
        self.mode == BbrMode::Drain && (self.in_flight as f64) < self.bdp()
    }

    pub fn enter_probe_bw(&mut self) {
        self.mode = BbrMode::ProbeBw;
    }

    /// Enter ProbeRTT. Returns how long to stay before moving back to
    /// ProbeBW: `min(min_rtt, 200 ms)`.
    pub fn enter_probe_rtt(&mut self) -> Duration {
        self.mode = BbrMode::ProbeRtt;
        debug!("{} enter ProbeRTT min_rtt={:.6}", self.name(), self.min_rtt);
        let duration = self.min_rtt.min(PROBE_RTT_DURATION.as_secs_f64());
        Duration::from_secs_f64(duration)
    }

    /// Advance the 8-phase ProbeBW pacing gain cycle. Returns the time until
    /// the next phase, one `min_rtt`, or a fixed tick while no RTT sample
    /// exists yet.
    pub fn advance_gain_cycle(&mut self) -> Duration {
        self.round_count += 1;
        self.pacing_gain = match self.round_count % GAIN_CYCLE_LEN {
            0 => 1.25,
            1 => 0.75,
            _ => 1.0,
        };
        if self.min_rtt < f64::MAX {
            Duration::from_secs_f64(self.min_rtt)
        } else {
            PROBE_RTT_DURATION
        }
    }

    /// Decide whether and when the next request may be sent.
    ///
    /// ProbeRTT caps the in-flight volume below
    /// [`PROBE_RTT_INFLIGHT_CAP`] and otherwise sends on a fixed cadence.
    /// All other states cap in-flight at `cwnd_gain * BDP` and space sends
    /// by `payload_size / (pacing_gain * max_bandwidth)`.
    pub fn send_decision(&self, payload_size: u64) -> SendDecision {
        if self.mode == BbrMode::ProbeRtt {
            if self.in_flight >= PROBE_RTT_INFLIGHT_CAP {
                return SendDecision::Blocked;
            }
            return SendDecision::After(PROBE_RTT_SEND_INTERVAL);
        }

        if self.in_flight as f64 >= self.cwnd_gain * self.bdp() {
            return SendDecision::Blocked;
        }

        let wait = payload_size as f64 / (self.pacing_gain * self.max_bandwidth);
        SendDecision::After(Duration::from_secs_f64(wait))
    }
}

impl Default for Bbr {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed an ack carrying an explicit delivery-rate observation.
    fn ack(bbr: &mut Bbr, rtt_ms: u64, delivered: u64, interval_ms: u64) {
        let start = Instant::now();
        bbr.on_ack(
            false,
            Duration::from_millis(rtt_ms),
            delivered,
            start + Duration::from_millis(interval_ms),
            0,
            start,
        );
    }

    #[test]
    fn startup_to_drain_once() {
        let mut bbr = Bbr::new();
        assert_eq!(bbr.mode(), BbrMode::Startup);

        // Growing delivery rates keep Startup going.
        bbr.on_sent();
        ack(&mut bbr, 100, 1000, 100); // 10 kB/s
        assert_eq!(bbr.mode(), BbrMode::Startup);
        assert_eq!(bbr.max_bandwidth(), 10_000.0);

        bbr.on_sent();
        ack(&mut bbr, 100, 2000, 100); // 20 kB/s
        assert_eq!(bbr.mode(), BbrMode::Startup);
        assert_eq!(bbr.max_bandwidth(), 20_000.0);

        // The first ack that fails to exceed the maximum exits Startup.
        bbr.on_sent();
        ack(&mut bbr, 100, 1500, 100);
        assert_eq!(bbr.mode(), BbrMode::Drain);
        assert_eq!(bbr.pacing_gain(), DRAIN_GAIN);
        assert_eq!(bbr.max_bandwidth(), 20_000.0);

        // Later non-improving acks do not re-trigger the transition.
        bbr.enter_probe_bw();
        bbr.on_sent();
        ack(&mut bbr, 100, 1500, 100);
        assert_eq!(bbr.mode(), BbrMode::ProbeBw);
    }

    #[test]
    fn retransmitted_acks_skip_the_model() {
        let mut bbr = Bbr::new();
        let now = Instant::now();

        bbr.on_sent();
        bbr.on_ack(true, Duration::from_millis(50), 1000, now, 0, now);
        assert_eq!(bbr.min_rtt(), f64::MAX);
        assert_eq!(bbr.max_bandwidth(), 0.0);
        assert_eq!(bbr.in_flight(), 0);
    }

    #[test]
    fn min_rtt_tracks_minimum() {
        let mut bbr = Bbr::new();

        ack(&mut bbr, 100, 1000, 100);
        assert_eq!(bbr.min_rtt(), 0.1);

        ack(&mut bbr, 40, 2000, 100);
        assert_eq!(bbr.min_rtt(), 0.04);

        ack(&mut bbr, 90, 3000, 100);
        assert_eq!(bbr.min_rtt(), 0.04);
    }

    #[test]
    fn drain_exit_requires_inflight_below_bdp() {
        let mut bbr = Bbr::new();

        ack(&mut bbr, 100, 1000, 100); // max_bw 10 kB/s, min_rtt 0.1s
        ack(&mut bbr, 100, 500, 100); // -> Drain
        assert_eq!(bbr.mode(), BbrMode::Drain);

        // BDP = 0.1 * 10000 = 1000... in-flight far above it.
        for _ in 0..1200 {
            bbr.on_sent();
        }
        assert!(!bbr.should_exit_drain());

        for _ in 0..1000 {
            bbr.on_timeout();
        }
        assert!(bbr.should_exit_drain());
    }

    #[test]
    fn startup_blocks_until_model_forms() {
        let bbr = Bbr::new();

        // Without a bandwidth estimate the BDP is zero and the in-flight cap
        // blocks; Startup is clocked by acks.
        assert_eq!(bbr.bdp(), 0.0);
        assert_eq!(bbr.send_decision(1000), SendDecision::Blocked);
    }

    #[test]
    fn pacing_interval_from_model() {
        let mut bbr = Bbr::new();

        ack(&mut bbr, 100, 1000, 100); // max_bw 10 kB/s
        bbr.enter_probe_bw();
        bbr.pacing_gain = 1.0;

        // 1000 bytes at 10 kB/s -> 100 ms between sends.
        match bbr.send_decision(1000) {
            SendDecision::After(wait) => assert_eq!(wait, Duration::from_millis(100)),
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn probe_rtt_caps_inflight() {
        let mut bbr = Bbr::new();
        ack(&mut bbr, 100, 1000, 100);

        let stay = bbr.enter_probe_rtt();
        assert_eq!(bbr.mode(), BbrMode::ProbeRtt);
        // min(min_rtt, 200 ms) with min_rtt = 100 ms.
        assert_eq!(stay, Duration::from_millis(100));

        for _ in 0..PROBE_RTT_INFLIGHT_CAP {
            bbr.on_sent();
        }
        assert_eq!(bbr.send_decision(1000), SendDecision::Blocked);

        bbr.on_timeout();
        assert_eq!(
            bbr.send_decision(1000),
            SendDecision::After(PROBE_RTT_SEND_INTERVAL)
        );
    }

    #[test]
    fn gain_cycle_phases() {
        let mut bbr = Bbr::new();
        ack(&mut bbr, 100, 1000, 100);

        // Phases repeat 1.25, 0.75, then 1.0 for the rest of the cycle,
        // offset by the initial round count.
        let mut gains = Vec::new();
        for _ in 0..GAIN_CYCLE_LEN {
            let wait = bbr.advance_gain_cycle();
            assert_eq!(wait, Duration::from_millis(100));
            gains.push(bbr.pacing_gain());
        }
        assert_eq!(gains, vec![0.75, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.25]);
    }

    #[test]
    fn gain_cycle_without_rtt_sample() {
        let mut bbr = Bbr::new();
        assert_eq!(bbr.min_rtt(), f64::MAX);

        // All acks so far carried zero RTT samples: the cycle still advances
        // on a finite tick.
        assert_eq!(bbr.advance_gain_cycle(), PROBE_RTT_DURATION);
        assert_eq!(bbr.pacing_gain(), 0.75);
    }
}
