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

use std::collections::BTreeSet;
use std::time::Duration;
use std::time::Instant;

use rustc_hash::FxHashMap;

/// A request that has been sent and not yet answered.
///
/// A retransmission mutates the record in place. There is never more than
/// one record per sequence.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OutstandingRequest {
    /// Sequence number of the request.
    pub seq: u64,

    /// Time of the most recent transmission.
    pub sent_time: Instant,

    /// Total delivered bytes at the time of sending.
    pub delivered_at_send: u64,

    /// Time of the last delivery at the time of sending.
    pub delivered_time_at_send: Instant,

    /// Whether this request has been retransmitted.
    pub retx: bool,
}

/// Outstanding requests indexed by sequence (for ack removal) and by send
/// time (for the ordered expiry scan). Both indices are kept consistent by
/// construction.
#[derive(Debug, Default)]
pub(crate) struct RetxTracker {
    /// Record per outstanding sequence.
    requests: FxHashMap<u64, OutstandingRequest>,

    /// Send-time ordered index over the records awaiting expiry.
    by_time: BTreeSet<(Instant, u64)>,

    /// Sequences queued for retransmission, consumed lowest first.
    retx_queue: BTreeSet<u64>,
}

impl RetxTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transmission for `seq`.
    ///
    /// A fresh send inserts a new record. A resend mutates the existing one:
    /// the send time and delivered snapshots are refreshed and the
    /// retransmit flag is set.
    pub fn on_sent(
        &mut self,
        seq: u64,
        now: Instant,
        delivered: u64,
        delivered_time: Instant,
        retx: bool,
    ) {
        if let Some(entry) = self.requests.get_mut(&seq) {
            self.by_time.remove(&(entry.sent_time, seq));
            entry.sent_time = now;
            entry.delivered_at_send = delivered;
            entry.delivered_time_at_send = delivered_time;
            entry.retx = entry.retx || retx;
        } else {
            self.requests.insert(
                seq,
                OutstandingRequest {
                    seq,
                    sent_time: now,
                    delivered_at_send: delivered,
                    delivered_time_at_send: delivered_time,
                    retx,
                },
            );
        }
        self.by_time.insert((now, seq));
    }

    /// Remove the record for an answered sequence.
    ///
    /// Also drops any pending retransmission for it.
    pub fn remove(&mut self, seq: u64) -> Option<OutstandingRequest> {
        self.retx_queue.remove(&seq);
        let entry = self.requests.remove(&seq)?;
        self.by_time.remove(&(entry.sent_time, seq));
        Some(entry)
    }

    /// Scan for expired requests, earliest send first.
    ///
    /// Entries with `sent_time + rto <= now` are removed from the time index
    /// and returned. The scan stops at the first unexpired entry: later
    /// entries were sent later and cannot have expired, assuming the RTO did
    /// not shrink since they were scheduled (a known approximation). The
    /// record itself stays in the by-sequence index until the sequence is
    /// either answered or retransmitted.
    pub fn sweep(&mut self, now: Instant, rto: Duration) -> Vec<u64> {
        let mut expired = Vec::new();
        while let Some(&(sent_time, seq)) = self.by_time.iter().next() {
            if sent_time + rto > now {
                break;
            }
            self.by_time.remove(&(sent_time, seq));
            expired.push(seq);
        }
        expired
    }

    /// Drop the time index entry for a sequence reported lost by the
    /// transport, so the sweep does not time it out a second time.
    pub fn unschedule(&mut self, seq: u64) {
        if let Some(entry) = self.requests.get(&seq) {
            self.by_time.remove(&(entry.sent_time, seq));
        }
    }

    /// Queue a sequence for retransmission.
    pub fn enqueue_retx(&mut self, seq: u64) {
        self.retx_queue.insert(seq);
    }

    /// Take the lowest queued retransmission, if any.
    pub fn next_retx(&mut self) -> Option<u64> {
        let seq = *self.retx_queue.iter().next()?;
        self.retx_queue.remove(&seq);
        Some(seq)
    }

    /// Whether any retransmission is queued.
    pub fn has_retx(&self) -> bool {
        !self.retx_queue.is_empty()
    }

    /// Number of outstanding requests.
    pub fn outstanding(&self) -> usize {
        self.requests.len()
    }

    /// Look up the record for a sequence.
    pub fn get(&self, seq: u64) -> Option<&OutstandingRequest> {
        self.requests.get(&seq)
    }

    /// Drop all records and queued retransmissions.
    pub fn clear(&mut self) {
        self.requests.clear();
        self.by_time.clear();
        self.retx_queue.clear();
    }
}
