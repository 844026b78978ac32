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

//! A multipath session and the subflows it is composed of.

use log::*;

use self::subflow::CaState;
use self::subflow::CongestionEvent;
use self::subflow::Subflow;
use self::subflow::SubflowMap;
use crate::congestion_control;
use crate::congestion_control::pool;
use crate::congestion_control::CongestionController;
use crate::Config;
use crate::Result;

/// A multipath session.
///
/// The session owns its subflows and the congestion controller selected by
/// the configuration. The host stack delivers acknowledgment, loss and state
/// events for a subflow in the order it observed them; every entry point
/// takes `&mut self`, so all updates of the session, including the pool
/// state of the controller, are serialized.
pub struct Session {
    /// Subflows of the session.
    subflows: SubflowMap,

    /// Congestion controller shared by the subflows.
    congestion: Box<dyn CongestionController>,

    /// Configuration used for new subflows.
    config: Config,
}

impl Session {
    /// Create a new session. The session starts in single path mode.
    pub fn new(conf: &Config) -> Self {
        Self {
            subflows: SubflowMap::new(conf.max_subflows),
            congestion: congestion_control::build_congestion_controller(conf),
            config: conf.clone(),
        }
    }

    /// Promote the session to multipath mode.
    ///
    /// Until then pool-aware controllers behave like Reno.
    pub fn enable_multipath(&mut self) {
        debug!("session {} enable multipath", self.congestion.name());
        self.subflows.enable_multipath();
    }

    /// Whether the session runs in multipath mode.
    pub fn is_multipath(&self) -> bool {
        self.subflows.is_multipath()
    }

    /// Name of the congestion control algorithm.
    pub fn congestion_control_name(&self) -> &str {
        self.congestion.name()
    }

    /// Add a subflow with the configured initial windows and return its
    /// identifier.
    pub fn insert_subflow(&mut self, trace_id: &str) -> Result<usize> {
        let sid = self.subflows.insert(Subflow::new(&self.config, trace_id))?;
        debug!(
            "{} subflow {} inserted, {} subflows",
            trace_id,
            sid,
            self.subflows.len()
        );
        Ok(sid)
    }

    /// Remove a subflow. It no longer contributes to the pool.
    pub fn remove_subflow(&mut self, sid: usize) -> Result<Subflow> {
        let subflow = self.subflows.remove(sid)?;
        debug!(
            "{} subflow {} removed, stats {:?}",
            subflow.trace_id(),
            sid,
            subflow.stats()
        );
        Ok(subflow)
    }

    /// Get an immutable reference to the subflow identified by `sid`.
    pub fn get(&self, sid: usize) -> Result<&Subflow> {
        self.subflows.get(sid)
    }

    /// Get a mutable reference to the subflow identified by `sid`, so that
    /// the host can update its path signals.
    pub fn get_mut(&mut self, sid: usize) -> Result<&mut Subflow> {
        self.subflows.get_mut(sid)
    }

    /// All subflows of the session.
    pub fn subflows(&self) -> &SubflowMap {
        &self.subflows
    }

    pub(crate) fn subflows_mut(&mut self) -> &mut SubflowMap {
        &mut self.subflows
    }

    /// Return an iterator over the subflow identifiers and subflows.
    pub fn iter(&self) -> slab::Iter<Subflow> {
        self.subflows.iter()
    }

    /// Process `acked` newly acknowledged segments on subflow `sid`.
    pub fn on_ack_received(&mut self, sid: usize, acked: u32) -> Result<()> {
        let multipath = self.subflows.is_multipath();
        let subflow = self.subflows.get_mut(sid)?;
        if acked == 0 {
            return Ok(());
        }
        subflow.stats.acked_segments = subflow.stats.acked_segments.saturating_add(acked.into());
        let cwnd = subflow.cwnd();
        let in_slow_start = self.congestion.in_slow_start(subflow, multipath);

        self.congestion.on_ack(&mut self.subflows, sid, acked)?;

        let subflow = self.subflows.get_mut(sid)?;
        if subflow.cwnd() > cwnd {
            let grown = u64::from(subflow.cwnd() - cwnd);
            let stats = &mut subflow.stats;
            if in_slow_start {
                stats.cwnd_increments_in_slow_start += grown;
            } else {
                stats.cwnd_increments_in_congestion_avoidance += grown;
            }
        }
        subflow.stat_cwnd_updated();

        trace!(
            "{} {} ON_ACK acked={} cwnd={} ssthresh={} cwnd_cnt={} increase={} snd_buffer={}",
            subflow.trace_id(),
            self.congestion.name(),
            acked,
            subflow.cwnd(),
            subflow.ssthresh(),
            subflow.cwnd_cnt(),
            self.congestion.increase_ratio(),
            self.congestion.snd_buffer()
        );
        Ok(())
    }

    /// Process a congestion event on subflow `sid`.
    pub fn on_congestion_event(&mut self, sid: usize, event: CongestionEvent) -> Result<()> {
        let subflow = self.subflows.get_mut(sid)?;
        self.congestion.on_congestion_event(subflow, event);

        if event == CongestionEvent::Loss {
            subflow.stats.timeouts = subflow.stats.timeouts.saturating_add(1);
        }
        subflow.stat_cwnd_updated();

        trace!(
            "{} {} ON_CONGESTION_EVENT {:?} cwnd={}",
            subflow.trace_id(),
            self.congestion.name(),
            event,
            subflow.cwnd()
        );
        Ok(())
    }

    /// Compute the slow start threshold of subflow `sid` after a loss.
    ///
    /// The host applies the returned value. The congestion window may be cut
    /// immediately if enough segments were SACKed for fast retransmit.
    pub fn ssthresh(&mut self, sid: usize) -> Result<u32> {
        self.subflows.get(sid)?;
        let ssthresh = self.congestion.ssthresh(&mut self.subflows, sid)?;

        let subflow = self.subflows.get_mut(sid)?;
        subflow.stat_cwnd_updated();

        trace!(
            "{} {} SSTHRESH {} cwnd={} sacked_out={}",
            subflow.trace_id(),
            self.congestion.name(),
            ssthresh,
            subflow.cwnd(),
            subflow.sacked_out()
        );
        Ok(ssthresh)
    }

    /// Compute the slow start threshold of subflow `sid` after a loss and
    /// store it on the subflow.
    pub fn enter_recovery(&mut self, sid: usize) -> Result<u32> {
        let ssthresh = self.ssthresh(sid)?;

        let subflow = self.subflows.get_mut(sid)?;
        subflow.set_ssthresh(ssthresh);
        subflow.stats.ssthresh_reductions = subflow.stats.ssthresh_reductions.saturating_add(1);
        Ok(ssthresh)
    }

    /// Record a congestion avoidance state change of subflow `sid`.
    pub fn on_state_change(&mut self, sid: usize, state: CaState) -> Result<()> {
        let subflow = self.subflows.get_mut(sid)?;
        trace!(
            "{} {} SET_STATE {:?} -> {:?}",
            subflow.trace_id(),
            self.congestion.name(),
            subflow.ca_state(),
            state
        );

        subflow.set_ca_state(state);
        self.congestion.on_state_change(subflow, state);
        Ok(())
    }

    /// Total scaled bandwidth of the sendable subflows.
    pub fn bandwidth_share(&self) -> u128 {
        let scale = self.config.rp_scale.clamp(1, crate::MAX_RP_SCALE);
        pool::bandwidth_share(&self.subflows, scale)
    }

    /// The most recently computed increase ratio.
    pub fn increase_ratio(&self) -> u64 {
        self.congestion.increase_ratio()
    }

    /// Pending increase credit of the session in bytes.
    pub fn snd_buffer(&self) -> u64 {
        self.congestion.snd_buffer()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "session cc={} multipath={} subflows={}",
            self.congestion.name(),
            self.subflows.is_multipath(),
            self.subflows.len()
        )
    }
}


pub mod subflow;
