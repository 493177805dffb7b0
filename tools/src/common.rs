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

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;
use std::time::Instant;

use log::debug;
use rand::Rng;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Behavior of the simulated responder.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Round-trip time of the simulated path.
    pub rtt: Duration,

    /// Percentage of requests silently dropped.
    pub loss_percent: u8,

    /// Percentage of responses carrying a congestion mark.
    pub mark_percent: u8,

    /// Size of each response, in bytes.
    pub response_size: u64,

    /// Target rate granted to receiver-driven sessions, in bytes per
    /// second. None leaves responses without a grant.
    pub target_rate: Option<u32>,
}

/// A response scheduled for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Delivery {
    /// Delivery time. Ordered first so the heap pops earliest deliveries.
    pub due: Instant,

    /// Sequence number being answered.
    pub seq: u64,

    /// Whether the response carries a congestion mark.
    pub congestion_marked: bool,
}

/// A loopback responder with a fixed RTT and random loss, enough to
/// exercise a session end to end without a network.
pub struct SimulatedLink {
    config: LinkConfig,
    pending: BinaryHeap<Reverse<Delivery>>,
}

impl SimulatedLink {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            pending: BinaryHeap::new(),
        }
    }

    /// Size of each response, in bytes.
    pub fn response_size(&self) -> u64 {
        self.config.response_size
    }

    /// Target rate granted to receiver-driven sessions.
    pub fn target_rate(&self) -> Option<u32> {
        self.config.target_rate
    }

    /// Accept a request: schedule its response one RTT out, or drop it.
    pub fn send(&mut self, seq: u64, now: Instant) {
        let mut rng = rand::thread_rng();
        if rng.gen_range(0..100) < self.config.loss_percent {
            debug!("link dropped seq={}", seq);
            return;
        }
        let congestion_marked = rng.gen_range(0..100) < self.config.mark_percent;
        self.pending.push(Reverse(Delivery {
            due: now + self.config.rtt,
            seq,
            congestion_marked,
        }));
    }

    /// The earliest pending delivery time, if any.
    pub fn next_delivery(&self) -> Option<Instant> {
        self.pending.peek().map(|d| d.0.due)
    }

    /// Take every delivery due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Vec<Delivery> {
        let mut due = Vec::new();
        while let Some(next) = self.pending.peek() {
            if next.0.due > now {
                break;
            }
            if let Some(Reverse(delivery)) = self.pending.pop() {
                due.push(delivery);
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(loss_percent: u8) -> SimulatedLink {
        SimulatedLink::new(LinkConfig {
            rtt: Duration::from_millis(40),
            loss_percent,
            mark_percent: 0,
            response_size: 1024,
            target_rate: None,
        })
    }

    #[test]
    fn delivers_after_rtt() {
        let mut link = link(0);
        let now = Instant::now();

        link.send(3, now);
        assert_eq!(link.next_delivery(), Some(now + Duration::from_millis(40)));
        assert!(link.pop_due(now).is_empty());

        let due = link.pop_due(now + Duration::from_millis(40));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].seq, 3);
    }

    #[test]
    fn full_loss_drops_everything() {
        let mut link = link(100);
        let now = Instant::now();

        link.send(0, now);
        link.send(1, now);
        assert_eq!(link.next_delivery(), None);
    }

    #[test]
    fn deliveries_in_time_order() {
        let mut link = link(0);
        let now = Instant::now();

        link.send(1, now + Duration::from_millis(10));
        link.send(0, now);
        let due = link.pop_due(now + Duration::from_secs(1));
        assert_eq!(due[0].seq, 0);
        assert_eq!(due[1].seq, 1);
    }
}
