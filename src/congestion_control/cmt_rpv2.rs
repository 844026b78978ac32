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

use std::cmp;

use log::*;

use super::pool;
use super::pool::CreditAccumulator;
use super::reno;
use super::CongestionController;
use crate::session::subflow::CaState;
use crate::session::subflow::CongestionEvent;
use crate::session::subflow::Subflow;
use crate::session::subflow::SubflowMap;
use crate::Config;
use crate::Result;

/// CMT/RPv2 Configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmtRpv2Config {
    /// Fixed-point shift of bandwidth estimates.
    scale: u32,

    /// Number of SACKed segments that triggers fast retransmit.
    dup_ack_threshold: u32,
}

impl CmtRpv2Config {
    pub fn new(scale: u32, dup_ack_threshold: u32) -> Self {
        Self {
            scale: scale.clamp(1, crate::MAX_RP_SCALE),
            dup_ack_threshold: cmp::max(dup_ack_threshold, 1),
        }
    }

    pub fn from(conf: &Config) -> Self {
        Self::new(conf.rp_scale, conf.dup_ack_threshold)
    }
}

impl Default for CmtRpv2Config {
    fn default() -> Self {
        Self::new(crate::DEFAULT_RP_SCALE, crate::DEFAULT_DUP_ACK_THRESHOLD)
    }
}

/// CMT/RPv2 congestion control algorithm.
///
/// Concurrent Multipath Transfer with Resource Pooling, version 2. The
/// window of each subflow grows with its share of the pool bandwidth
/// `cwnd_i / srtt_i` relative to the sum over all sendable subflows, and is
/// reduced after a loss by half of the pool window seen from that subflow.
///
/// Sessions that have not been promoted to multipath fall back to Reno.
///
/// See T. Dreibholz, "Evaluation and Optimisation of Multi-Path Transport
/// using the Stream Control Transmission Protocol", 2012.
#[derive(Debug)]
pub struct CmtRpv2 {
    /// Configuration.
    config: CmtRpv2Config,

    /// Increase ratio computed for the latest acknowledgment.
    increase: u64,

    /// Increase credit shared by the subflows of this session.
    snd_buffer: CreditAccumulator,
}

impl CmtRpv2 {
    pub fn new(config: CmtRpv2Config) -> Self {
        Self {
            config,
            increase: 0,
            snd_buffer: CreditAccumulator::new(),
        }
    }

    /// Compute and store the increase ratio of subflow `sid` for `factor`
    /// bytes of acknowledged data.
    fn calc_increase_ratio(
        &mut self,
        subflows: &SubflowMap,
        sid: usize,
        factor: u64,
    ) -> Result<u64> {
        let total = pool::bandwidth_share(subflows, self.config.scale);
        let subflow = subflows.get(sid)?;

        self.increase = pool::increase_ratio(subflow, total, factor, self.config.scale);
        Ok(self.increase)
    }

    /// Convert one MSS of pending credit into one segment of window.
    fn grow_by_credit(&mut self, subflow: &mut Subflow) -> bool {
        if !self.snd_buffer.try_consume(subflow.mss) {
            return false;
        }

        if subflow.cwnd < subflow.cwnd_clamp {
            subflow.cwnd += 1;
        }
        true
    }

    /// Pool-aware slow start.
    ///
    /// Returns the acknowledged segments not covered by the growth up to
    /// `ssthresh + 1`.
    fn slow_start(&mut self, subflows: &mut SubflowMap, sid: usize, acked: u32) -> Result<u32> {
        let subflow = subflows.get(sid)?;
        let cwnd = subflow.cwnd;
        let target = cmp::min(
            cwnd.saturating_add(acked),
            subflow.ssthresh.saturating_add(1),
        );

        // The credit of one call never exceeds one segment, however many
        // segments the acknowledgment covers.
        let mss = u64::from(subflow.mss);
        let factor = cmp::min(u64::from(acked) * mss, mss);

        let increase = self.calc_increase_ratio(subflows, sid, factor)?;
        self.snd_buffer.add(increase);

        let subflow = subflows.get_mut(sid)?;
        self.grow_by_credit(subflow);

        Ok(acked.saturating_sub(target.saturating_sub(cwnd)))
    }

    /// Pool-aware congestion avoidance.
    fn cong_avoid(&mut self, subflows: &mut SubflowMap, sid: usize, acked: u32) -> Result<()> {
        if !subflows.is_multipath() {
            reno::cong_avoid(subflows.get_mut(sid)?, acked);
            return Ok(());
        }

        let subflow = subflows.get(sid)?;
        if !subflow.is_cwnd_limited() {
            return Ok(());
        }

        if subflow.in_slow_start() {
            self.slow_start(subflows, sid, acked)?;
            return Ok(());
        }

        let mss = u64::from(subflow.mss);
        let increase = self.calc_increase_ratio(subflows, sid, mss)?;
        self.snd_buffer.add(increase);

        // Reno pacing: at most one segment per window of acknowledgments,
        // and only once the pool granted a full segment of credit.
        let subflow = subflows.get_mut(sid)?;
        if subflow.cwnd_cnt >= subflow.cwnd {
            if self.grow_by_credit(subflow) {
                subflow.cwnd_cnt = 0;
            }
        } else {
            subflow.cwnd_cnt += 1;
        }

        Ok(())
    }

    /// Pool-aware slow start threshold.
    fn calc_ssthresh(&self, subflows: &SubflowMap, sid: usize) -> Result<u32> {
        let total = pool::bandwidth_share(subflows, self.config.scale);
        let subflow = subflows.get(sid)?;
        let decrease = pool::pool_decrease(subflow, total, self.config.scale);

        if decrease < u64::from(subflow.cwnd) {
            // The difference is at least one.
            Ok(subflow.cwnd - decrease as u32)
        } else {
            Ok(1)
        }
    }

    /// Enter the reduced window at once if enough segments were SACKed.
    fn fast_retransmit(&self, subflow: &mut Subflow, ssthresh: u32) {
        if subflow.sacked_out < self.config.dup_ack_threshold {
            return;
        }

        trace!(
            "{} {} FAST_RTX sacked_out={} cwnd={} -> {}",
            subflow.trace_id(),
            self.name(),
            subflow.sacked_out,
            subflow.cwnd,
            ssthresh
        );
        subflow.cwnd = ssthresh.clamp(1, subflow.cwnd_clamp);
        subflow.stats.fast_retransmits = subflow.stats.fast_retransmits.saturating_add(1);
    }
}

impl CongestionController for CmtRpv2 {
    fn name(&self) -> &str {
        "CMTRPV2"
    }

    fn on_ack(&mut self, subflows: &mut SubflowMap, sid: usize, acked: u32) -> Result<()> {
        self.cong_avoid(subflows, sid, acked)
    }

    fn ssthresh(&mut self, subflows: &mut SubflowMap, sid: usize) -> Result<u32> {
        if !subflows.is_multipath() {
            return Ok(reno::ssthresh(subflows.get(sid)?));
        }

        let ssthresh = self.calc_ssthresh(subflows, sid)?;
        self.fast_retransmit(subflows.get_mut(sid)?, ssthresh);

        Ok(ssthresh)
    }

    fn on_congestion_event(&mut self, subflow: &mut Subflow, event: CongestionEvent) {
        if event == CongestionEvent::Loss {
            trace!("{} {} RTO cwnd={} -> 1", subflow.trace_id(), self.name(), subflow.cwnd);
            subflow.cwnd = 1;
        }
    }

    fn on_state_change(&mut self, _subflow: &mut Subflow, _state: CaState) {
        // State transitions do not feed into the pool policy.
    }

    fn in_slow_start(&self, subflow: &Subflow, multipath: bool) -> bool {
        if multipath {
            subflow.in_slow_start()
        } else {
            subflow.cwnd < subflow.ssthresh
        }
    }

    fn increase_ratio(&self) -> u64 {
        self.increase
    }

    fn snd_buffer(&self) -> u64 {
        self.snd_buffer.credit()
    }
}
