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

use std::fs::File;
use std::io::BufReader;
use std::time::Duration;

use log::debug;
use log::info;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use mpcc::CaState;
use mpcc::CongestionEvent;
use mpcc::Config;
use mpcc::Session;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Load a session configuration from a JSON file.
pub fn load_config(path: &str) -> Result<Config> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Build the log target: the given file, or stderr.
pub fn log_target(log_file: &Option<String>) -> Result<env_logger::Target> {
    match log_file {
        Some(path) => Ok(env_logger::Target::Pipe(Box::new(File::create(path)?))),
        None => Ok(env_logger::Target::Stderr),
    }
}

/// A synthetic network path carrying one subflow.
#[derive(Debug, Clone, Copy)]
pub struct PathModel {
    /// Round trip time of the path.
    pub rtt: Duration,

    /// Probability that a segment is lost.
    pub loss: f64,
}

/// Per round observation of one subflow.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundSample {
    /// Congestion window at the end of the round, in segments.
    pub cwnd: u32,

    /// Segments delivered in the round.
    pub delivered: u32,

    /// Segments lost in the round.
    pub lost: u32,
}

struct SimPath {
    sid: usize,
    model: PathModel,
    samples: Vec<RoundSample>,
}

/// Round based simulator driving a session over synthetic paths.
///
/// In every round each subflow sends a full window. Every segment is lost
/// independently with the probability of its path. Delivered segments are
/// acknowledged one by one; a round with losses enters recovery, and a round
/// in which nothing was delivered is treated as a retransmission timeout.
pub struct Simulator {
    session: Session,
    paths: Vec<SimPath>,
    rng: StdRng,
}

impl Simulator {
    pub fn new(conf: &Config, paths: &[PathModel], multipath: bool, seed: u64) -> Result<Self> {
        let mut session = Session::new(conf);
        if multipath {
            session.enable_multipath();
        }

        let mut sim_paths = Vec::with_capacity(paths.len());
        for (i, model) in paths.iter().enumerate() {
            if !(0.0..=1.0).contains(&model.loss) {
                return Err(format!("invalid loss probability {}", model.loss).into());
            }
            let sid = session.insert_subflow(&format!("path-{i}"))?;
            session.get_mut(sid)?.set_srtt(model.rtt);
            sim_paths.push(SimPath {
                sid,
                model: *model,
                samples: Vec::new(),
            });
        }

        Ok(Self {
            session,
            paths: sim_paths,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Run one round on every path.
    pub fn run_round(&mut self) -> Result<()> {
        for path in self.paths.iter_mut() {
            let sid = path.sid;
            let cwnd = self.session.get(sid)?.cwnd();

            let mut delivered = 0;
            for _ in 0..cwnd {
                if !self.rng.gen_bool(path.model.loss) {
                    delivered += 1;
                }
            }
            let lost = cwnd - delivered;

            if delivered == 0 {
                self.session.on_state_change(sid, CaState::Loss)?;
                self.session.enter_recovery(sid)?;
                self.session.on_congestion_event(sid, CongestionEvent::Loss)?;
            } else if lost > 0 {
                self.session.on_state_change(sid, CaState::Recovery)?;
                self.session.get_mut(sid)?.set_sacked_out(delivered);
                self.session.enter_recovery(sid)?;
                self.session.get_mut(sid)?.set_sacked_out(0);
            } else {
                if self.session.get(sid)?.ca_state() != CaState::Open {
                    self.session.on_state_change(sid, CaState::Open)?;
                }
                for _ in 0..delivered {
                    self.session.on_ack_received(sid, 1)?;
                }
            }

            let sample = RoundSample {
                cwnd: self.session.get(sid)?.cwnd(),
                delivered,
                lost,
            };
            debug!("{} round {:?}", self.session.get(sid)?.trace_id(), sample);
            path.samples.push(sample);
        }
        Ok(())
    }

    /// Run the given number of rounds.
    pub fn run(&mut self, rounds: usize) -> Result<()> {
        for _ in 0..rounds {
            self.run_round()?;
        }
        info!(
            "{} rounds done, bandwidth share {}",
            rounds,
            self.session.bandwidth_share()
        );
        Ok(())
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Subflow identifier, path model and samples of every path.
    pub fn paths(&self) -> impl Iterator<Item = (usize, &PathModel, &[RoundSample])> {
        self.paths
            .iter()
            .map(|p| (p.sid, &p.model, p.samples.as_slice()))
    }
}
