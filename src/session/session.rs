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

//! A congestion-controlled pull session.
//!
//! The session is sans-I/O: it never touches a socket or a clock of its
//! own. The caller asks [`Session::timeout`] when the next timer fires,
//! calls [`Session::on_timeout`] at that time, feeds deliveries in through
//! the `on_response`/`on_request_timeout`/`on_nack` callbacks, and drains
//! [`Event`]s through [`Session::poll`]. `Event::SendRequest` is the
//! transport boundary: the caller serializes and delivers it.
//!
//! All state transitions happen inside those entry points, on the caller's
//! single thread. A stopped session turns every entry point into a no-op,
//! so callbacks that were already in flight when the session stopped are
//! harmless.

use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

use log::*;

use crate::congestion_control;
use crate::congestion_control::Controller;
use crate::congestion_control::SendDecision;
use crate::session::rtt::AckMode;
use crate::session::rtt::RttEstimator;
use crate::session::timer::Timer;
use crate::session::timer::TimerTable;
use crate::session::tracker::RetxTracker;
use crate::Config;
use crate::Result;
use crate::RATE_TRACE_INTERVAL;
use crate::RETX_SWEEP_INTERVAL;

/// An output of the session, drained through [`Session::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Emit a request for `seq`. The caller owns serialization and
    /// delivery.
    SendRequest {
        seq: u64,
        retx: bool,
        service_class: u8,
        payload_size: u64,
        lifetime: Duration,
    },

    /// A response for `seq` was accepted. `rtt` is the sample taken for it,
    /// zero when the request had been retransmitted.
    Response { seq: u64, rtt: Duration },

    /// A negative acknowledgement for `seq` was accepted.
    NegativeAck {
        seq: u64,
        rtt: Duration,
        reason: String,
    },

    /// The request for `seq` timed out and was queued for retransmission.
    RequestTimeout { seq: u64 },

    /// Periodic telemetry: bytes received and requests sent since the last
    /// report.
    RateReport { recv_bytes: u64, sent_requests: u64 },

    /// All requested sequences are answered, or the session was stopped.
    Finished,
}

/// Cumulative session counters.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Total requests sent, retransmissions included.
    pub sent_requests: u64,

    /// Total retransmitted requests.
    pub retransmitted_requests: u64,

    /// Total responses accepted.
    pub recv_responses: u64,

    /// Total response bytes accepted.
    pub recv_bytes: u64,

    /// Total negative acknowledgements accepted.
    pub nacks: u64,

    /// Total request timeouts.
    pub timeouts: u64,
}

/// A pull session: one flow of sequenced requests under one congestion
/// controller.
pub struct Session {
    /// Configuration, immutable for the session lifetime.
    config: Config,

    /// Prefix used to identify the session in log records.
    trace_id: String,

    /// Timer table, owned exclusively by the session.
    timers: TimerTable,

    /// Outstanding requests and the retransmit queue.
    tracker: RetxTracker,

    /// RTT estimation and retransmission timeout.
    rtt: RttEstimator,

    /// The active congestion controller.
    cc: Controller,

    /// Pacing rate override in bytes per second, taken from the configured
    /// fixed rate and set by the greedy switch once it fires. Bypasses the
    /// controller's send decision.
    fixed_rate: Option<u64>,

    /// Outputs awaiting `poll()`.
    events: VecDeque<Event>,

    /// Next fresh sequence to assign.
    next_seq: u64,

    /// Responses accepted so far.
    received: u64,

    /// Total bytes delivered, snapshotted per send for delivery-rate
    /// measurement.
    delivered: u64,

    /// Time of the most recent delivery.
    delivered_time: Instant,

    /// Bytes received since the last rate report.
    trace_recv_bytes: u64,

    /// Requests sent since the last rate report.
    trace_sent: u64,

    /// Cumulative counters.
    stats: SessionStats,

    started: bool,
    stopped: bool,
    finished: bool,
}

impl Session {
    /// Create a session from a validated configuration.
    pub fn new(conf: &Config) -> Result<Session> {
        conf.validate()?;

        let now = Instant::now();
        // Every request is answered individually, so acks are matched by
        // exact sequence.
        let mut rtt = RttEstimator::new(AckMode::Exact, conf.initial_rtt);
        rtt.set_min_rto(conf.min_rto);
        rtt.set_max_rto(conf.max_rto);

        Ok(Session {
            trace_id: conf.prefix.clone(),
            timers: TimerTable::default(),
            tracker: RetxTracker::new(),
            rtt,
            cc: Controller::build(conf, now),
            fixed_rate: conf.fixed_rate,
            events: VecDeque::new(),
            next_seq: conf.start_seq,
            received: 0,
            delivered: 0,
            delivered_time: now,
            trace_recv_bytes: 0,
            trace_sent: 0,
            stats: SessionStats::default(),
            started: false,
            stopped: false,
            finished: false,
            config: conf.clone(),
        })
    }

    /// Start the session: arm the periodic timers and schedule the first
    /// send after the configured start delay.
    pub fn start(&mut self, now: Instant) {
        if self.started || self.stopped {
            return;
        }
        self.started = true;
        debug!(
            "{} start algorithm={} start_seq={} max_seq={:?}",
            self.trace_id,
            self.cc.name(),
            self.config.start_seq,
            self.config.max_seq
        );

        self.timers.set(Timer::RetxSweep, now + RETX_SWEEP_INTERVAL);
        self.timers.set(Timer::RateTrace, now + RATE_TRACE_INTERVAL);
        if let Some(delay) = self.config.hard_stop {
            self.timers.set(Timer::HardStop, now + delay);
        }
        if self.config.greedy_rate.is_some() {
            self.timers
                .set(Timer::GreedyStart, now + self.config.greedy_delay);
        }
        self.timers
            .set(Timer::NextSend, now + self.config.delay_start);
    }

    /// Stop the session: cancel every timer and emit `Finished`.
    pub fn stop(&mut self, _now: Instant) {
        if self.stopped {
            return;
        }
        debug!("{} stop", self.trace_id);
        self.stopped = true;
        self.timers.stop_all();
        self.tracker.clear();
        if !self.finished {
            self.finished = true;
            self.events.push_back(Event::Finished);
        }
    }

    /// The earliest deadline among the pending timers, if any.
    pub fn timeout(&self) -> Option<Instant> {
        self.timers.next_timeout()
    }

    /// Run every timer whose deadline has passed.
    pub fn on_timeout(&mut self, now: Instant) {
        if self.stopped {
            return;
        }

        if self.timers.is_expired(Timer::HardStop, now) {
            self.timers.stop(Timer::HardStop);
            debug!("{} hard stop", self.trace_id);
            self.stop(now);
            return;
        }

        if self.timers.is_expired(Timer::GreedyStart, now) {
            self.timers.stop(Timer::GreedyStart);
            if let Some(rate) = self.config.greedy_rate {
                debug!("{} greedy start rate={}", self.trace_id, rate);
                self.fixed_rate = Some(rate);
                if let Controller::Qsccp(cc) = &mut self.cc {
                    cc.start_greedy(rate);
                }
                // The pending send was paced for the old rate.
                self.timers.stop(Timer::NextSend);
                self.schedule_next(now);
            }
        }

        if self.timers.is_expired(Timer::RetxSweep, now) {
            let rto = self.rtt.rto();
            for seq in self.tracker.sweep(now, rto) {
                self.handle_expiry(seq, now);
            }
            self.timers.set(Timer::RetxSweep, now + RETX_SWEEP_INTERVAL);
        }

        if self.timers.is_expired(Timer::RateTrace, now) {
            trace!(
                "{} rate trace recv_bytes={} sent_requests={}",
                self.trace_id,
                self.trace_recv_bytes,
                self.trace_sent
            );
            self.events.push_back(Event::RateReport {
                recv_bytes: self.trace_recv_bytes,
                sent_requests: self.trace_sent,
            });
            self.trace_recv_bytes = 0;
            self.trace_sent = 0;
            self.timers.set(Timer::RateTrace, now + RATE_TRACE_INTERVAL);
        }

        if self.timers.is_expired(Timer::BbrGainCycle, now) {
            self.timers.stop(Timer::BbrGainCycle);
            if let Controller::Bbr(cc) = &mut self.cc {
                let wait = cc.advance_gain_cycle();
                self.timers.set(Timer::BbrGainCycle, now + wait);
            }
        }

        if self.timers.is_expired(Timer::BbrProbeRttEnter, now) {
            self.timers.stop(Timer::BbrProbeRttEnter);
            if let Controller::Bbr(cc) = &mut self.cc {
                let stay = cc.enter_probe_rtt();
                self.timers.set(Timer::BbrProbeRttExit, now + stay);
                self.timers
                    .set(Timer::BbrProbeRttEnter, now + congestion_control::PROBE_RTT_INTERVAL);
            }
        }

        if self.timers.is_expired(Timer::BbrProbeRttExit, now) {
            self.timers.stop(Timer::BbrProbeRttExit);
            if let Controller::Bbr(cc) = &mut self.cc {
                cc.enter_probe_bw();
            }
        }

        if self.timers.is_expired(Timer::NextSend, now) {
            self.timers.stop(Timer::NextSend);
            self.send_request(now);
        }
    }

    /// Accept a response for `seq`.
    ///
    /// Unknown or already-answered sequences are ignored; arrival order is
    /// irrelevant, only sequence numbers define state.
    pub fn on_response(
        &mut self,
        seq: u64,
        bytes: u64,
        congestion_marked: bool,
        target_rate: Option<u32>,
        now: Instant,
    ) {
        if self.stopped {
            return;
        }
        let entry = match self.tracker.remove(seq) {
            Some(entry) => entry,
            None => return,
        };

        self.received += 1;
        self.stats.recv_responses += 1;
        self.stats.recv_bytes += bytes;
        self.trace_recv_bytes += bytes;
        self.delivered += bytes;
        self.delivered_time = now;

        let rtt = self.rtt.on_ack(seq, now);
        trace!(
            "{} response seq={} bytes={} marked={} rtt={:?}",
            self.trace_id,
            seq,
            bytes,
            congestion_marked,
            rtt
        );

        match &mut self.cc {
            Controller::Window(cc) => {
                cc.on_ack(seq, self.next_seq, congestion_marked, now);
            }
            Controller::Bbr(cc) => {
                cc.on_ack(
                    entry.retx,
                    rtt,
                    self.delivered,
                    self.delivered_time,
                    entry.delivered_at_send,
                    entry.delivered_time_at_send,
                );
            }
            Controller::Qsccp(cc) => {
                if let Some(rate) = target_rate {
                    cc.update_rate(rate as u64);
                }
            }
        }

        self.events.push_back(Event::Response { seq, rtt });

        self.maybe_finish();
        self.schedule_next(now);
    }

    /// Accept a transport-level lifetime expiry for `seq`.
    ///
    /// Equivalent to the periodic sweep finding the request expired.
    pub fn on_request_timeout(&mut self, seq: u64, now: Instant) {
        if self.stopped {
            return;
        }
        if self.tracker.get(seq).is_none() {
            return;
        }
        self.tracker.unschedule(seq);
        self.handle_expiry(seq, now);
    }

    /// Accept a negative acknowledgement for `seq`.
    ///
    /// A nack releases the in-flight slot and is reported upward, but is
    /// not by itself a congestion signal.
    pub fn on_nack(&mut self, seq: u64, reason: &str, now: Instant) {
        if self.stopped {
            return;
        }
        if self.tracker.remove(seq).is_none() {
            return;
        }

        self.stats.nacks += 1;
        let rtt = self.rtt.on_ack(seq, now);
        debug!("{} nack seq={} reason={}", self.trace_id, seq, reason);

        self.cc.on_nack();
        self.events.push_back(Event::NegativeAck {
            seq,
            rtt,
            reason: reason.to_string(),
        });
        self.schedule_next(now);
    }

    /// Drain the next pending output.
    pub fn poll(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Whether the session was stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Whether every requested sequence has been answered.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Cumulative counters.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// A request expired: back off the timeout, queue the retransmission
    /// and let the controller react.
    fn handle_expiry(&mut self, seq: u64, now: Instant) {
        self.stats.timeouts += 1;
        self.rtt.backoff();
        // Re-mark the sequence as sent so a response arriving before the
        // retransmission goes out cannot feed the filter (Karn's algorithm).
        self.rtt.on_sent(seq, 1, now);
        self.tracker.enqueue_retx(seq);
        self.cc.on_request_timeout(self.next_seq, now);
        trace!(
            "{} request timeout seq={} rto={:?} multiplier={}",
            self.trace_id,
            seq,
            self.rtt.rto(),
            self.rtt.multiplier()
        );
        self.events.push_back(Event::RequestTimeout { seq });
        self.schedule_next(now);
    }

    /// Whether every fresh sequence has been assigned.
    fn ceiling_reached(&self) -> bool {
        self.config
            .max_seq
            .map_or(false, |max| self.next_seq >= max)
    }

    /// (Re)arm the send timer from the controller's decision.
    ///
    /// The send timer is owned here alone: a pending deadline is left in
    /// place, never double-armed.
    fn schedule_next(&mut self, now: Instant) {
        if self.stopped || self.finished {
            return;
        }
        if self.timers.is_pending(Timer::NextSend) {
            return;
        }
        if !self.tracker.has_retx() && self.ceiling_reached() {
            return;
        }

        // A fixed rate paces every controller the same way, regardless of
        // the window or path model.
        if let Some(rate) = self.fixed_rate {
            let wait = self.config.payload_size as f64 * 1e9 / rate as f64;
            self.timers
                .set(Timer::NextSend, now + Duration::from_nanos(wait as u64 + 1));
            return;
        }

        if let Controller::Bbr(cc) = &mut self.cc {
            if cc.should_exit_drain() {
                cc.enter_probe_bw();
                let wait = cc.advance_gain_cycle();
                self.timers.set(Timer::BbrGainCycle, now + wait);
                self.timers
                    .set(Timer::BbrProbeRttEnter, now + congestion_control::PROBE_RTT_INTERVAL);
            }
        }

        match self.cc.send_decision(self.config.payload_size) {
            SendDecision::Now => self.timers.set(Timer::NextSend, now),
            SendDecision::After(wait) => self.timers.set(Timer::NextSend, now + wait),
            SendDecision::Blocked => {}
        }
    }

    /// The send timer fired: emit one request, retransmissions first, then
    /// re-evaluate the schedule.
    fn send_request(&mut self, now: Instant) {
        let (seq, retx) = match self.tracker.next_retx() {
            Some(seq) => (seq, true),
            None => {
                if self.ceiling_reached() {
                    return;
                }
                let seq = self.next_seq;
                self.next_seq += 1;
                (seq, false)
            }
        };

        self.tracker
            .on_sent(seq, now, self.delivered, self.delivered_time, retx);
        self.rtt.on_sent(seq, 1, now);
        self.cc.on_sent();

        self.stats.sent_requests += 1;
        if retx {
            self.stats.retransmitted_requests += 1;
        }
        self.trace_sent += 1;

        trace!(
            "{} send seq={} retx={} outstanding={}",
            self.trace_id,
            seq,
            retx,
            self.tracker.outstanding()
        );
        self.events.push_back(Event::SendRequest {
            seq,
            retx,
            service_class: self.config.service_class,
            payload_size: self.config.payload_size,
            lifetime: self.config.lifetime,
        });

        self.schedule_next(now);
    }

    /// Emit `Finished` once the last requested sequence is answered.
    fn maybe_finish(&mut self) {
        if self.finished {
            return;
        }
        let max = match self.config.max_seq {
            Some(max) => max,
            None => return,
        };
        let done = match &self.cc {
            // The receiver-driven session counts deliveries.
            Controller::Qsccp(_) => {
                self.received >= max.saturating_sub(self.config.start_seq)
            }
            _ => {
                self.next_seq >= max
                    && self.tracker.outstanding() == 0
                    && !self.tracker.has_retx()
            }
        };
        if done {
            debug!("{} finished received={}", self.trace_id, self.received);
            self.finished = true;
            self.timers.stop_all();
            self.events.push_back(Event::Finished);
        }
    }
}

pub mod rtt;
pub(crate) mod timer;
pub(crate) mod tracker;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion_control::CcAlgorithm;

    /// Run every timer due at or before `now`.
    fn run_timers(session: &mut Session, now: Instant) {
        while let Some(deadline) = session.timeout() {
            if deadline > now {
                break;
            }
            session.on_timeout(now);
        }
    }

    /// Drain pending `SendRequest` events.
    fn take_sends(session: &mut Session) -> Vec<(u64, bool)> {
        let mut sends = Vec::new();
        while let Some(event) = session.poll() {
            if let Event::SendRequest { seq, retx, .. } = event {
                sends.push((seq, retx));
            }
        }
        sends
    }

    fn aimd_config(max_seq: u64) -> Config {
        let mut conf = Config::new();
        conf.set_cc_algorithm(CcAlgorithm::Aimd);
        conf.set_max_seq(Some(max_seq));
        conf
    }

    #[test]
    fn aimd_end_to_end() {
        let mut session = Session::new(&aimd_config(5)).unwrap();
        let mut now = Instant::now();
        session.start(now);

        // The initial window of 1 admits exactly one request.
        run_timers(&mut session, now);
        assert_eq!(take_sends(&mut session), vec![(0, false)]);

        // Five sequential acks grow the window 1 -> 6 and finish the
        // session once all of seq 0..5 are answered.
        let mut acked = 0;
        let mut sent = 1;
        while acked < 5 {
            now += Duration::from_millis(10);
            session.on_response(acked, 1024, false, None, now);
            acked += 1;
            run_timers(&mut session, now);
            for (seq, retx) in take_sends(&mut session) {
                assert_eq!(seq, sent);
                assert!(!retx);
                sent += 1;
            }
        }

        assert_eq!(sent, 5);
        assert!(session.is_finished());
        if let Controller::Window(cc) = &session.cc {
            assert_eq!(cc.window(), 6.0);
        } else {
            panic!("expected a window controller");
        }
        assert!(session.timeout().is_none());
    }

    #[test]
    fn finished_event_after_last_response() {
        let mut session = Session::new(&aimd_config(1)).unwrap();
        let now = Instant::now();
        session.start(now);
        run_timers(&mut session, now);
        assert_eq!(take_sends(&mut session), vec![(0, false)]);

        let later = now + Duration::from_millis(20);
        session.on_response(0, 512, false, None, later);

        let mut saw_finish = false;
        while let Some(event) = session.poll() {
            if event == Event::Finished {
                saw_finish = true;
            }
        }
        assert!(saw_finish);
        assert!(session.is_finished());
    }

    #[test]
    fn sweep_requeues_expired_request() {
        let mut conf = aimd_config(10);
        conf.set_initial_rtt(Duration::from_millis(100));
        let mut session = Session::new(&conf).unwrap();
        let now = Instant::now();
        session.start(now);
        run_timers(&mut session, now);
        assert_eq!(take_sends(&mut session), vec![(0, false)]);

        // The RTO for the untouched estimator is clamped by the initial
        // estimate; expire well past it.
        let rto = session.rtt.rto();
        let later = now + rto + Duration::from_millis(100);
        run_timers(&mut session, later);

        let mut saw_timeout = false;
        let mut saw_retx = false;
        while let Some(event) = session.poll() {
            match event {
                Event::RequestTimeout { seq } => {
                    assert_eq!(seq, 0);
                    saw_timeout = true;
                }
                Event::SendRequest { seq, retx, .. } => {
                    assert_eq!(seq, 0);
                    assert!(retx);
                    saw_retx = true;
                }
                _ => {}
            }
        }
        assert!(saw_timeout);
        assert!(saw_retx);
        assert_eq!(session.stats().timeouts, 1);
        assert_eq!(session.stats().retransmitted_requests, 1);
        assert!(session.rtt.multiplier() > 1);
    }

    #[test]
    fn retransmissions_take_priority() {
        let mut conf = aimd_config(10);
        conf.set_initial_window(3.0);
        let mut session = Session::new(&conf).unwrap();
        let now = Instant::now();
        session.start(now);
        run_timers(&mut session, now);
        assert_eq!(
            take_sends(&mut session),
            vec![(0, false), (1, false), (2, false)]
        );

        // Lifetime expiry for seq 1 while 0 and 2 are still outstanding.
        let later = now + Duration::from_millis(50);
        session.on_request_timeout(1, later);
        run_timers(&mut session, later);

        let sends = take_sends(&mut session);
        assert_eq!(sends, vec![(1, true)]);
    }

    #[test]
    fn nack_is_not_a_congestion_signal() {
        let mut conf = aimd_config(10);
        conf.set_initial_window(2.0);
        let mut session = Session::new(&conf).unwrap();
        let now = Instant::now();
        session.start(now);
        run_timers(&mut session, now);
        take_sends(&mut session);

        let later = now + Duration::from_millis(10);
        session.on_nack(0, "no-route", later);

        let mut saw_nack = false;
        while let Some(event) = session.poll() {
            if let Event::NegativeAck { seq, reason, .. } = event {
                assert_eq!(seq, 0);
                assert_eq!(reason, "no-route");
                saw_nack = true;
            }
        }
        assert!(saw_nack);
        assert_eq!(session.stats().nacks, 1);
        if let Controller::Window(cc) = &session.cc {
            assert_eq!(cc.window(), 2.0);
        }
    }

    #[test]
    fn unknown_sequence_ignored() {
        let mut session = Session::new(&aimd_config(10)).unwrap();
        let now = Instant::now();
        session.start(now);
        run_timers(&mut session, now);
        take_sends(&mut session);

        session.on_response(7, 1024, false, None, now);
        assert_eq!(session.stats().recv_responses, 0);
        assert!(session.poll().is_none());
    }

    #[test]
    fn duplicate_response_ignored() {
        let mut session = Session::new(&aimd_config(10)).unwrap();
        let mut now = Instant::now();
        session.start(now);
        run_timers(&mut session, now);
        take_sends(&mut session);

        now += Duration::from_millis(10);
        session.on_response(0, 1024, false, None, now);
        session.on_response(0, 1024, false, None, now);
        assert_eq!(session.stats().recv_responses, 1);
    }

    #[test]
    fn stopped_session_ignores_callbacks() {
        let mut session = Session::new(&aimd_config(10)).unwrap();
        let now = Instant::now();
        session.start(now);
        run_timers(&mut session, now);
        take_sends(&mut session);

        session.stop(now);
        assert!(session.is_stopped());
        assert!(session.timeout().is_none());
        assert_eq!(session.poll(), Some(Event::Finished));

        // Fired-but-stale callbacks are no-ops.
        session.on_response(0, 1024, false, None, now);
        session.on_timeout(now + Duration::from_secs(1));
        assert!(session.poll().is_none());
        assert_eq!(session.stats().recv_responses, 0);
    }

    #[test]
    fn rate_report_resets_counters() {
        let mut conf = aimd_config(10);
        // Keep the sweep from expiring anything during the test.
        conf.set_initial_rtt(Duration::from_secs(10));
        let mut session = Session::new(&conf).unwrap();
        let mut now = Instant::now();
        session.start(now);
        run_timers(&mut session, now);
        take_sends(&mut session);

        now += Duration::from_millis(10);
        session.on_response(0, 2048, false, None, now);

        now += RATE_TRACE_INTERVAL;
        run_timers(&mut session, now);

        let mut reports = Vec::new();
        while let Some(event) = session.poll() {
            if let Event::RateReport {
                recv_bytes,
                sent_requests,
            } = event
            {
                reports.push((recv_bytes, sent_requests));
            }
        }
        assert_eq!(reports.len(), 1);
        let (recv_bytes, sent_requests) = reports[0];
        assert_eq!(recv_bytes, 2048);
        assert!(sent_requests >= 1);

        // The next report starts from zero.
        now += RATE_TRACE_INTERVAL;
        run_timers(&mut session, now);
        let mut second = None;
        while let Some(event) = session.poll() {
            if let Event::RateReport {
                recv_bytes,
                sent_requests,
            } = event
            {
                second = Some((recv_bytes, sent_requests));
            }
        }
        assert!(matches!(second, Some((0, _))));
    }

    #[test]
    fn hard_stop_timer() {
        let mut conf = aimd_config(1000);
        conf.set_hard_stop(Some(Duration::from_secs(2)));
        let mut session = Session::new(&conf).unwrap();
        let now = Instant::now();
        session.start(now);
        run_timers(&mut session, now);
        take_sends(&mut session);

        run_timers(&mut session, now + Duration::from_secs(2));
        assert!(session.is_stopped());
        let events: Vec<_> = std::iter::from_fn(|| session.poll()).collect();
        assert!(events.contains(&Event::Finished));
    }

    #[test]
    fn fixed_rate_overrides_window_pacing() {
        let mut conf = aimd_config(10);
        conf.set_payload_size(1000);
        conf.set_fixed_rate(Some(1_000_000));
        let mut session = Session::new(&conf).unwrap();
        let now = Instant::now();
        session.start(now);

        // 1 MB/s paces 1000-byte requests 1 ms apart.
        let interval = Duration::from_nanos(1_000_001);
        run_timers(&mut session, now);
        assert_eq!(take_sends(&mut session), vec![(0, false)]);
        assert_eq!(session.timers.get(Timer::NextSend), Some(now + interval));

        // The second request goes out on the paced tick without any
        // response, even though the window of 1 is full.
        run_timers(&mut session, now + interval);
        assert_eq!(take_sends(&mut session), vec![(1, false)]);
    }

    #[test]
    fn greedy_rate_activates_for_window_session() {
        let mut conf = aimd_config(10);
        conf.set_payload_size(1000);
        conf.set_greedy_rate(Some(1_000_000), Duration::from_millis(10));
        let mut session = Session::new(&conf).unwrap();
        let now = Instant::now();
        session.start(now);

        // Before the switch the window of 1 blocks further sends.
        run_timers(&mut session, now);
        assert_eq!(take_sends(&mut session), vec![(0, false)]);
        assert!(!session.timers.is_pending(Timer::NextSend));

        // The switch replaces the window pacing with the greedy rate.
        let at = now + Duration::from_millis(10);
        let interval = Duration::from_nanos(1_000_001);
        run_timers(&mut session, at);
        assert_eq!(session.timers.get(Timer::NextSend), Some(at + interval));

        run_timers(&mut session, at + interval);
        assert_eq!(take_sends(&mut session), vec![(1, false)]);
    }

    #[test]
    fn late_response_after_expiry_keeps_backoff() {
        let mut conf = aimd_config(10);
        conf.set_initial_window(2.0);
        let mut session = Session::new(&conf).unwrap();
        let now = Instant::now();
        session.start(now);
        run_timers(&mut session, now);
        assert_eq!(take_sends(&mut session), vec![(0, false), (1, false)]);

        let later = now + Duration::from_secs(2);
        session.on_request_timeout(0, later);
        session.on_request_timeout(1, later);
        assert_eq!(session.rtt.multiplier(), 4);

        // A response arriving after the expiry but before the retransmission
        // goes out must not feed the filter or reset the backoff.
        session.on_response(1, 1024, false, None, later + Duration::from_millis(5));
        assert_eq!(session.rtt.multiplier(), 4);
        assert_eq!(session.rtt.samples(), 0);
    }

    #[test]
    fn qsccp_paced_by_target_rate() {
        let mut conf = Config::new();
        conf.set_cc_algorithm(CcAlgorithm::Qsccp);
        conf.set_max_seq(Some(100));
        conf.set_payload_size(1000);
        let mut session = Session::new(&conf).unwrap();
        let now = Instant::now();
        session.start(now);

        // The first request goes out unpaced; no further send is scheduled
        // until a rate is known.
        run_timers(&mut session, now);
        assert_eq!(take_sends(&mut session), vec![(0, false)]);
        assert_eq!(
            session.timeout(),
            Some(now + RETX_SWEEP_INTERVAL)
        );

        // A granted rate of 1 MB/s paces 1000-byte requests 1 ms apart.
        let later = now + Duration::from_millis(10);
        session.on_response(0, 1000, false, Some(1_000_000), later);
        let next_send = session.timers.get(Timer::NextSend).unwrap();
        assert_eq!(next_send, later + Duration::from_nanos(1_000_001));
    }

    #[test]
    fn qsccp_greedy_switch() {
        let mut conf = Config::new();
        conf.set_cc_algorithm(CcAlgorithm::Qsccp);
        conf.set_max_seq(Some(100));
        conf.set_greedy_rate(Some(2_000_000), Duration::from_secs(1));
        let mut session = Session::new(&conf).unwrap();
        let now = Instant::now();
        session.start(now);
        run_timers(&mut session, now);
        take_sends(&mut session);

        run_timers(&mut session, now + Duration::from_secs(1));
        if let Controller::Qsccp(cc) = &session.cc {
            assert_eq!(cc.send_rate(), 2_000_000.0);
        } else {
            panic!("expected the receiver-driven controller");
        }
    }

    #[test]
    fn bbr_startup_is_ack_clocked() {
        let mut conf = Config::new();
        conf.set_cc_algorithm(CcAlgorithm::Bbr);
        conf.set_max_seq(Some(1000));
        conf.set_payload_size(1000);
        let mut session = Session::new(&conf).unwrap();
        let mut now = Instant::now();
        session.start(now);

        run_timers(&mut session, now);
        assert_eq!(take_sends(&mut session), vec![(0, false)]);

        // Each response refreshes the model and unblocks further sends.
        now += Duration::from_millis(20);
        session.on_response(0, 1000, false, None, now);
        let sends = take_sends(&mut session);
        assert!(sends.is_empty());
        assert!(session.timers.is_pending(Timer::NextSend));
    }
}
