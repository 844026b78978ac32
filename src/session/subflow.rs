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
use std::time::Duration;

use serde::Serialize;
use slab::Slab;

use crate::error::Error;
use crate::Config;
use crate::Result;

/// Congestion avoidance states of a subflow, as tracked by the host stack.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub enum CaState {
    /// Nothing bad has been observed recently.
    #[default]
    Open,

    /// Duplicate acknowledgments or SACKs were received.
    Disorder,

    /// The window was reduced due to a congestion notification.
    Cwr,

    /// The window was reduced and fast retransmit is in progress.
    Recovery,

    /// A retransmission timeout occurred.
    Loss,
}

/// Congestion events reported by the host stack.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CongestionEvent {
    /// First transmission after an idle period.
    TxStart,

    /// Congestion window restart after an idle period.
    CwndRestart,

    /// The window reduction caused by a congestion notification completed.
    CompleteCwr,

    /// The retransmission timer expired.
    Loss,
}

/// Congestion statistics of a subflow.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CongestionStats {
    /// Total segments acknowledged.
    pub acked_segments: u64,

    /// Window growth in segments while in slow start.
    pub cwnd_increments_in_slow_start: u64,

    /// Window growth in segments while in congestion avoidance.
    pub cwnd_increments_in_congestion_avoidance: u64,

    /// Number of retransmission timeouts.
    pub timeouts: u64,

    /// Number of times the window was cut to ssthresh by fast retransmit.
    pub fast_retransmits: u64,

    /// Number of slow start threshold reductions.
    pub ssthresh_reductions: u64,

    /// Minimum congestion window in segments.
    pub min_cwnd: u32,

    /// Maximum congestion window in segments.
    pub max_cwnd: u32,
}

/// One path of a multipath session, as seen by the congestion controller.
///
/// The host stack creates subflows and keeps the path signals (`srtt`,
/// `mss`, `sacked_out`, activity and window limitation) up to date. The
/// controller only updates the window fields.
pub struct Subflow {
    /// Congestion window in segments.
    pub(crate) cwnd: u32,

    /// Slow start threshold in segments.
    pub(crate) ssthresh: u32,

    /// Smoothed RTT in microseconds. Zero if no sample is available.
    pub(crate) srtt_us: u64,

    /// Maximum segment size in bytes.
    pub(crate) mss: u32,

    /// Number of SACKed but not yet cumulatively acknowledged segments.
    pub(crate) sacked_out: u32,

    /// Acknowledgments counted since the last additive increase.
    pub(crate) cwnd_cnt: u32,

    /// Upper bound of the congestion window.
    pub(crate) cwnd_clamp: u32,

    /// Whether the host considers the subflow eligible to send.
    active: bool,

    /// Whether the subflow is using its full congestion window.
    cwnd_limited: bool,

    /// The congestion avoidance state last reported by the host.
    ca_state: CaState,

    /// Congestion statistics.
    pub(crate) stats: CongestionStats,

    /// Trace id.
    trace_id: String,
}

impl Subflow {
    /// Create a new subflow with the windows configured in `conf`.
    pub(crate) fn new(conf: &Config, trace_id: &str) -> Self {
        let cwnd_clamp = cmp::max(conf.cwnd_clamp, 1);
        let cwnd = conf.initial_congestion_window.clamp(1, cwnd_clamp);

        Self {
            cwnd,
            ssthresh: cmp::max(conf.initial_ssthresh, 1),
            srtt_us: 0,
            mss: cmp::max(conf.max_segment_size, 1),
            sacked_out: 0,
            cwnd_cnt: 0,
            cwnd_clamp,
            active: true,
            cwnd_limited: true,
            ca_state: CaState::Open,
            stats: CongestionStats {
                min_cwnd: cwnd,
                max_cwnd: cwnd,
                ..CongestionStats::default()
            },
            trace_id: trace_id.to_string(),
        }
    }

    /// Congestion window in segments.
    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    /// Set the congestion window in segments, bounded to `[1, cwnd_clamp]`.
    pub fn set_cwnd(&mut self, cwnd: u32) {
        self.cwnd = cwnd.clamp(1, self.cwnd_clamp);
        self.stat_cwnd_updated();
    }

    /// Slow start threshold in segments.
    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    /// Set the slow start threshold in segments. Zero is treated as 1.
    pub fn set_ssthresh(&mut self, ssthresh: u32) {
        self.ssthresh = cmp::max(ssthresh, 1);
    }

    /// Smoothed RTT in microseconds, zero if unknown.
    pub fn srtt_us(&self) -> u64 {
        self.srtt_us
    }

    /// Update the smoothed RTT estimated by the host stack.
    pub fn set_srtt(&mut self, srtt: Duration) {
        self.srtt_us = u64::try_from(srtt.as_micros()).unwrap_or(u64::MAX);
    }

    /// Maximum segment size in bytes.
    pub fn mss(&self) -> u32 {
        self.mss
    }

    /// Update the maximum segment size. Zero is treated as 1.
    pub fn set_mss(&mut self, mss: u32) {
        self.mss = cmp::max(mss, 1);
    }

    /// Number of SACKed segments.
    pub fn sacked_out(&self) -> u32 {
        self.sacked_out
    }

    /// Update the number of SACKed segments.
    pub fn set_sacked_out(&mut self, sacked_out: u32) {
        self.sacked_out = sacked_out;
    }

    /// Acknowledgments counted towards the next additive increase.
    pub fn cwnd_cnt(&self) -> u32 {
        self.cwnd_cnt
    }

    /// Upper bound of the congestion window.
    pub fn cwnd_clamp(&self) -> u32 {
        self.cwnd_clamp
    }

    /// Update the upper bound of the congestion window. The current window is
    /// reduced if it exceeds the new bound.
    pub fn set_cwnd_clamp(&mut self, clamp: u32) {
        self.cwnd_clamp = cmp::max(clamp, 1);
        if self.cwnd > self.cwnd_clamp {
            self.cwnd = self.cwnd_clamp;
            self.stat_cwnd_updated();
        }
    }

    /// Whether the subflow is eligible to send.
    pub fn active(&self) -> bool {
        self.active
    }

    /// Mark the subflow as eligible to send or not.
    pub fn set_active(&mut self, v: bool) {
        self.active = v;
    }

    /// Whether the subflow is using its full congestion window.
    pub fn is_cwnd_limited(&self) -> bool {
        self.cwnd_limited
    }

    /// Report whether the subflow is using its full congestion window.
    pub fn set_cwnd_limited(&mut self, v: bool) {
        self.cwnd_limited = v;
    }

    /// Whether the subflow takes part in bandwidth aggregation: it must be
    /// active and have an RTT sample.
    pub fn can_send(&self) -> bool {
        self.active && self.srtt_us > 0
    }

    /// Check if the window is at or below the slow start threshold.
    pub fn in_slow_start(&self) -> bool {
        self.cwnd <= self.ssthresh
    }

    /// The congestion avoidance state last reported by the host.
    pub fn ca_state(&self) -> CaState {
        self.ca_state
    }

    pub(crate) fn set_ca_state(&mut self, state: CaState) {
        self.ca_state = state;
    }

    /// Congestion statistics.
    pub fn stats(&self) -> &CongestionStats {
        &self.stats
    }

    /// Trace id.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Update statistics for the congestion window.
    pub(crate) fn stat_cwnd_updated(&mut self) {
        self.stats.min_cwnd = cmp::min(self.stats.min_cwnd, self.cwnd);
        self.stats.max_cwnd = cmp::max(self.stats.max_cwnd, self.cwnd);
    }
}

impl std::fmt::Debug for Subflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} cwnd={} ssthresh={} srtt={}us mss={} sacked_out={} cwnd_cnt={}",
            self.trace_id,
            self.cwnd,
            self.ssthresh,
            self.srtt_us,
            self.mss,
            self.sacked_out,
            self.cwnd_cnt
        )
    }
}

/// Subflow manager for a multipath session.
pub struct SubflowMap {
    /// The subflows of the session. Each subflow has an identifier which is
    /// its index in the slab.
    subflows: Slab<Subflow>,

    /// The maximum number of subflows allowed.
    max_subflows: usize,

    /// Whether the session runs in multipath mode.
    is_multipath: bool,
}

impl SubflowMap {
    pub(crate) fn new(max_subflows: usize) -> Self {
        Self {
            subflows: Slab::with_capacity(2),
            max_subflows,
            is_multipath: false,
        }
    }

    /// Get an immutable reference to the subflow identified by `sid`.
    pub fn get(&self, sid: usize) -> Result<&Subflow> {
        self.subflows.get(sid).ok_or(Error::InvalidSubflow(sid))
    }

    /// Get a mutable reference to the subflow identified by `sid`.
    pub fn get_mut(&mut self, sid: usize) -> Result<&mut Subflow> {
        self.subflows.get_mut(sid).ok_or(Error::InvalidSubflow(sid))
    }

    /// Insert a new subflow.
    pub(crate) fn insert(&mut self, subflow: Subflow) -> Result<usize> {
        if self.subflows.len() >= self.max_subflows {
            return Err(Error::InvalidState(format!(
                "subflow limit {} reached",
                self.max_subflows
            )));
        }

        Ok(self.subflows.insert(subflow))
    }

    /// Remove the subflow identified by `sid`.
    pub(crate) fn remove(&mut self, sid: usize) -> Result<Subflow> {
        self.subflows
            .try_remove(sid)
            .ok_or(Error::InvalidSubflow(sid))
    }

    /// Return an immutable iterator over all existing subflows.
    pub fn iter(&self) -> slab::Iter<Subflow> {
        self.subflows.iter()
    }

    /// Return a mutable iterator over all existing subflows.
    pub fn iter_mut(&mut self) -> slab::IterMut<Subflow> {
        self.subflows.iter_mut()
    }

    /// Return the number of subflows.
    pub fn len(&self) -> usize {
        self.subflows.len()
    }

    /// Whether there is no subflow.
    pub fn is_empty(&self) -> bool {
        self.subflows.is_empty()
    }

    /// Whether the session runs in multipath mode.
    pub fn is_multipath(&self) -> bool {
        self.is_multipath
    }

    /// Promote to multipath mode.
    pub(crate) fn enable_multipath(&mut self) {
        self.is_multipath = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subflow_defaults() {
        let conf = Config::new();
        let sf = Subflow::new(&conf, "sf");
        assert_eq!(sf.cwnd(), 10);
        assert_eq!(sf.ssthresh(), crate::INFINITE_SSTHRESH);
        assert_eq!(sf.mss(), crate::DEFAULT_MSS);
        assert_eq!(sf.srtt_us(), 0);
        assert_eq!(sf.cwnd_cnt(), 0);
        assert_eq!(sf.ca_state(), CaState::Open);
        assert!(sf.active());
        assert!(sf.is_cwnd_limited());
        assert!(sf.in_slow_start());

        // No RTT sample yet.
        assert!(!sf.can_send());
        assert_eq!(sf.stats().min_cwnd, 10);
        assert_eq!(sf.stats().max_cwnd, 10);
    }

    #[test]
    fn subflow_window_bounds() {
        let mut conf = Config::new();
        conf.set_cwnd_clamp(20);
        let mut sf = Subflow::new(&conf, "sf");

        sf.set_cwnd(0);
        assert_eq!(sf.cwnd(), 1);
        sf.set_cwnd(100);
        assert_eq!(sf.cwnd(), 20);
        sf.set_ssthresh(0);
        assert_eq!(sf.ssthresh(), 1);
        sf.set_mss(0);
        assert_eq!(sf.mss(), 1);

        sf.set_cwnd_clamp(15);
        assert_eq!(sf.cwnd(), 15);
        assert_eq!(sf.stats().min_cwnd, 1);
        assert_eq!(sf.stats().max_cwnd, 20);
    }

    #[test]
    fn subflow_can_send() {
        let conf = Config::new();
        let mut sf = Subflow::new(&conf, "sf");

        sf.set_srtt(Duration::from_millis(10));
        assert_eq!(sf.srtt_us(), 10_000);
        assert!(sf.can_send());

        sf.set_active(false);
        assert!(!sf.can_send());

        sf.set_active(true);
        sf.set_srtt(Duration::ZERO);
        assert!(!sf.can_send());
    }

    #[test]
    fn subflow_map() -> Result<()> {
        let conf = Config::new();
        let mut map = SubflowMap::new(2);
        assert!(map.is_empty());
        assert!(!map.is_multipath());

        let a = map.insert(Subflow::new(&conf, "a"))?;
        let b = map.insert(Subflow::new(&conf, "b"))?;
        assert_eq!(map.len(), 2);
        assert!(matches!(
            map.insert(Subflow::new(&conf, "c")),
            Err(Error::InvalidState(_))
        ));

        assert_eq!(map.get(a)?.trace_id(), "a");
        map.get_mut(b)?.set_cwnd(4);
        assert_eq!(map.get(b)?.cwnd(), 4);

        let removed = map.remove(a)?;
        assert_eq!(removed.trace_id(), "a");
        assert_eq!(map.get(a).err(), Some(Error::InvalidSubflow(a)));
        assert_eq!(map.remove(a).err(), Some(Error::InvalidSubflow(a)));
        assert_eq!(map.iter().count(), 1);

        map.enable_multipath();
        assert!(map.is_multipath());
        Ok(())
    }
}
