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

use std::time::Instant;

use strum::EnumCount;
use strum_macros::EnumCount;
use strum_macros::EnumIter;

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, EnumIter, EnumCount)]
pub(crate) enum Timer {
    /// When to emit the next request. Exclusively owned by the pacing
    /// scheduler; rearming overwrites the pending deadline.
    NextSend,

    /// When to scan outstanding requests for expired retransmission timeouts
    RetxSweep,

    /// When to emit the periodic rate telemetry tick
    RateTrace,

    /// When to stop the session unconditionally
    HardStop,

    /// When to switch the send rate to the configured greedy rate
    GreedyStart,

    /// When to advance the BBR ProbeBW pacing gain cycle
    BbrGainCycle,

    /// When to re-enter the BBR ProbeRTT state
    BbrProbeRttEnter,

    /// When to leave the BBR ProbeRTT state
    BbrProbeRttExit,
}

/// Associated timeout values with each `Timer`
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct TimerTable {
    expires: [Option<Instant>; Timer::COUNT],
}

impl TimerTable {
    /// Set expiration time for the given timer
    pub fn set(&mut self, timer: Timer, time: Instant) {
        self.expires[timer as usize] = Some(time);
    }

    /// Get expiration time for the given timer
    pub fn get(&self, timer: Timer) -> Option<Instant> {
        self.expires[timer as usize]
    }

    /// Cancel the given timer
    pub fn stop(&mut self, timer: Timer) {
        self.expires[timer as usize] = None;
    }

    /// Cancel all timers
    pub fn stop_all(&mut self) {
        self.expires = [None; Timer::COUNT];
    }

    /// Check whether the given timer is pending
    pub fn is_pending(&self, timer: Timer) -> bool {
        self.expires[timer as usize].is_some()
    }

    /// Get the minimum expiration time of all timers
    pub fn next_timeout(&self) -> Option<Instant> {
        self.expires.iter().filter_map(|&x| x).min()
    }

    /// Check whether the given timer is expired
    pub fn is_expired(&self, timer: Timer, after: Instant) -> bool {
        self.expires[timer as usize].map_or(false, |x| x <= after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Add;
    use std::time::Duration;
    use std::time::Instant;

    #[test]
    fn timer_operation() {
        let mut timers = TimerTable::default();
        assert_eq!(timers.next_timeout(), None);

        // Set timers
        let now = Instant::now();
        let send_time = now.add(Duration::from_millis(10));
        let sweep_time = now.add(Duration::from_millis(50));
        timers.set(Timer::NextSend, send_time);
        timers.set(Timer::RetxSweep, sweep_time);

        assert_eq!(timers.get(Timer::NextSend), Some(send_time));
        assert_eq!(timers.get(Timer::RetxSweep), Some(sweep_time));
        assert_eq!(timers.get(Timer::HardStop), None);
        assert!(timers.is_pending(Timer::NextSend));
        assert_eq!(timers.next_timeout(), Some(send_time));

        // Rearming replaces the pending deadline
        let later = now.add(Duration::from_millis(30));
        timers.set(Timer::NextSend, later);
        assert_eq!(timers.get(Timer::NextSend), Some(later));

        // Stop timer
        timers.stop(Timer::NextSend);
        assert_eq!(timers.get(Timer::NextSend), None);
        assert!(!timers.is_pending(Timer::NextSend));
        assert_eq!(timers.next_timeout(), Some(sweep_time));

        // Stop all timers
        timers.stop_all();
        assert_eq!(timers.next_timeout(), None);
    }

    #[test]
    fn timer_expiration() {
        let mut timers = TimerTable::default();
        let now = Instant::now();
        let send_time = now.add(Duration::from_millis(10));
        let trace_time = now.add(Duration::from_millis(500));
        timers.set(Timer::NextSend, send_time);
        timers.set(Timer::RateTrace, trace_time);

        assert_eq!(timers.is_expired(Timer::NextSend, now), false);
        assert_eq!(timers.is_expired(Timer::RateTrace, now), false);

        // Advance ticks
        let now = send_time;
        assert_eq!(timers.is_expired(Timer::NextSend, now), true);
        assert_eq!(timers.is_expired(Timer::RateTrace, now), false);

        // Advance ticks
        let now = trace_time;
        assert_eq!(timers.is_expired(Timer::NextSend, now), true);
        assert_eq!(timers.is_expired(Timer::RateTrace, now), true);
    }
}
