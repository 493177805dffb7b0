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

//! A demo client that pulls a range of sequences over a simulated link,
//! printing per-response delays and the periodic rate trace.

use std::cmp;
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use clap::Parser;
use log::debug;
use log::info;

use pullcc::CcAlgorithm;
use pullcc::Config;
use pullcc::Event;
use pullcc::Session;
use pullcc_tools::LinkConfig;
use pullcc_tools::Result;
use pullcc_tools::SimulatedLink;

#[derive(Parser, Debug, Clone)]
#[clap(name = "client")]
pub struct ClientOpt {
    /// Name prefix of the pulled flow.
    #[clap(short, long, default_value = "/demo", value_name = "STR")]
    pub prefix: String,

    /// Congestion control algorithm (aimd, bic, cubic, bbr, qsccp).
    #[clap(short, long, default_value = "cubic", value_name = "STR")]
    pub algorithm: String,

    /// First sequence number to request.
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub start_seq: u64,

    /// Number of sequences to pull.
    #[clap(short = 'n', long, default_value = "1000", value_name = "NUM")]
    pub count: u64,

    /// Request lifetime in milliseconds.
    #[clap(long, default_value = "4000", value_name = "TIME")]
    pub lifetime: u64,

    /// Payload size hint in bytes.
    #[clap(long, default_value = "8624", value_name = "NUM")]
    pub payload_size: u64,

    /// Initial request window.
    #[clap(long, default_value = "1", value_name = "NUM")]
    pub initial_window: f64,

    /// Fixed send rate in bytes per second (receiver-driven sessions).
    #[clap(long, value_name = "NUM")]
    pub fixed_rate: Option<u64>,

    /// Greedy send rate in bytes per second, activated after --greedy-delay.
    #[clap(long, value_name = "NUM")]
    pub greedy_rate: Option<u64>,

    /// Delay before the greedy rate takes effect, in milliseconds.
    #[clap(long, default_value = "0", value_name = "TIME")]
    pub greedy_delay: u64,

    /// Stop the session unconditionally after this delay, in milliseconds.
    #[clap(long, value_name = "TIME")]
    pub hard_stop: Option<u64>,

    /// Simulated link round-trip time in milliseconds.
    #[clap(long, default_value = "50", value_name = "TIME")]
    pub link_rtt: u64,

    /// Simulated link loss percentage.
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub link_loss: u8,

    /// Simulated congestion-mark percentage.
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub link_marks: u8,

    /// Target rate granted by the simulated responder, in bytes per second.
    #[clap(long, value_name = "NUM")]
    pub link_grant: Option<u32>,

    /// Log level, support OFF/ERROR/WARN/INFO/DEBUG/TRACE.
    #[clap(long, default_value = "INFO", value_name = "STR")]
    pub log_level: log::LevelFilter,
}

struct Client {
    session: Session,
    link: SimulatedLink,
    start_time: Instant,
}

impl Client {
    fn new(option: &ClientOpt) -> Result<Self> {
        let algorithm = CcAlgorithm::from_str(&option.algorithm)?;

        let mut conf = Config::new();
        conf.set_prefix(&option.prefix);
        conf.set_cc_algorithm(algorithm);
        conf.set_start_seq(option.start_seq);
        conf.set_max_seq(Some(option.start_seq + option.count));
        conf.set_lifetime(Duration::from_millis(option.lifetime));
        conf.set_payload_size(option.payload_size);
        conf.set_initial_window(option.initial_window);
        conf.set_fixed_rate(option.fixed_rate);
        conf.set_greedy_rate(
            option.greedy_rate,
            Duration::from_millis(option.greedy_delay),
        );
        conf.set_hard_stop(option.hard_stop.map(Duration::from_millis));

        let link = SimulatedLink::new(LinkConfig {
            rtt: Duration::from_millis(option.link_rtt),
            loss_percent: option.link_loss,
            mark_percent: option.link_marks,
            response_size: option.payload_size,
            target_rate: option.link_grant,
        });

        Ok(Self {
            session: Session::new(&conf)?,
            link,
            start_time: Instant::now(),
        })
    }

    fn start(&mut self) {
        self.session.start(self.start_time);

        loop {
            if self.process_events() {
                break;
            }

            // Wait for the earlier of the next session timer and the next
            // link delivery.
            let deadline = match (self.session.timeout(), self.link.next_delivery()) {
                (Some(timer), Some(delivery)) => cmp::min(timer, delivery),
                (Some(timer), None) => timer,
                (None, Some(delivery)) => delivery,
                (None, None) => break,
            };
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }

            let now = Instant::now();
            for delivery in self.link.pop_due(now) {
                self.session.on_response(
                    delivery.seq,
                    self.link.response_size(),
                    delivery.congestion_marked,
                    self.link.target_rate(),
                    now,
                );
            }
            self.session.on_timeout(now);
        }

        self.finish();
    }

    /// Drain session outputs. Returns true once the session finished.
    fn process_events(&mut self) -> bool {
        let mut finished = false;
        while let Some(event) = self.session.poll() {
            match event {
                Event::SendRequest { seq, retx, .. } => {
                    debug!("send seq={} retx={}", seq, retx);
                    self.link.send(seq, Instant::now());
                }
                Event::Response { seq, rtt } => {
                    debug!("response seq={} rtt={:?}", seq, rtt);
                }
                Event::NegativeAck { seq, reason, .. } => {
                    info!("nack seq={} reason={}", seq, reason);
                }
                Event::RequestTimeout { seq } => {
                    info!("timeout seq={}", seq);
                }
                Event::RateReport {
                    recv_bytes,
                    sent_requests,
                } => {
                    info!(
                        "rate recv_bytes={} sent_requests={}",
                        recv_bytes, sent_requests
                    );
                }
                Event::Finished => {
                    finished = true;
                }
            }
        }
        finished
    }

    fn finish(&self) {
        let stats = self.session.stats();
        let elapsed = self.start_time.elapsed();
        info!(
            "finished in {:?}: sent={} retx={} received={} bytes={} nacks={} timeouts={}",
            elapsed,
            stats.sent_requests,
            stats.retransmitted_requests,
            stats.recv_responses,
            stats.recv_bytes,
            stats.nacks,
            stats.timeouts,
        );
    }
}

fn main() -> Result<()> {
    let option = ClientOpt::parse();

    env_logger::builder()
        .filter_level(option.log_level)
        .format_timestamp_millis()
        .init();

    let mut client = Client::new(&option)?;
    client.start();

    Ok(())
}
