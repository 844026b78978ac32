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

use super::CongestionController;
use crate::session::subflow::CongestionEvent;
use crate::session::subflow::Subflow;
use crate::session::subflow::SubflowMap;
use crate::Result;

/// Lower bound of the slow start threshold after a loss.
const MIN_SSTHRESH: u32 = 2;

/// Reno slow start: grow by the acknowledged segments up to ssthresh.
///
/// Returns the acknowledged segments left over once ssthresh is reached.
/// See RFC 5681 Section 3.1.
pub(crate) fn slow_start(subflow: &mut Subflow, acked: u32) -> u32 {
    let cwnd = cmp::min(subflow.cwnd.saturating_add(acked), subflow.ssthresh);
    let acked = acked - (cwnd - subflow.cwnd);

    subflow.cwnd = cmp::min(cwnd, subflow.cwnd_clamp);
    acked
}

/// Additive increase: one segment per `w` acknowledged segments.
pub(crate) fn cong_avoid_ai(subflow: &mut Subflow, w: u32, acked: u32) {
    let w = cmp::max(w, 1);

    // If credits accumulated at a higher w, apply them gently now.
    if subflow.cwnd_cnt >= w {
        subflow.cwnd_cnt = 0;
        subflow.cwnd = subflow.cwnd.saturating_add(1);
    }

    subflow.cwnd_cnt = subflow.cwnd_cnt.saturating_add(acked);
    if subflow.cwnd_cnt >= w {
        let delta = subflow.cwnd_cnt / w;
        subflow.cwnd_cnt -= delta * w;
        subflow.cwnd = subflow.cwnd.saturating_add(delta);
    }

    subflow.cwnd = cmp::min(subflow.cwnd, subflow.cwnd_clamp);
}

/// Reno window update for `acked` newly acknowledged segments.
pub(crate) fn cong_avoid(subflow: &mut Subflow, acked: u32) {
    if !subflow.is_cwnd_limited() {
        return;
    }

    let mut acked = acked;
    if subflow.cwnd < subflow.ssthresh {
        acked = slow_start(subflow, acked);
        if acked == 0 {
            return;
        }
    }

    let w = subflow.cwnd;
    cong_avoid_ai(subflow, w, acked);
}

/// Reno slow start threshold: half of the window, at least two segments.
pub(crate) fn ssthresh(subflow: &Subflow) -> u32 {
    cmp::max(subflow.cwnd >> 1, MIN_SSTHRESH)
}

/// Reno congestion control. Every subflow behaves as an independent flow.
///
/// See RFC 5681.
#[derive(Debug, Default)]
pub struct Reno {}

impl Reno {
    pub fn new() -> Self {
        Self {}
    }
}

impl CongestionController for Reno {
    fn name(&self) -> &str {
        "RENO"
    }

    fn on_ack(&mut self, subflows: &mut SubflowMap, sid: usize, acked: u32) -> Result<()> {
        let subflow = subflows.get_mut(sid)?;
        cong_avoid(subflow, acked);
        Ok(())
    }

    fn ssthresh(&mut self, subflows: &mut SubflowMap, sid: usize) -> Result<u32> {
        Ok(ssthresh(subflows.get(sid)?))
    }

    fn on_congestion_event(&mut self, subflow: &mut Subflow, event: CongestionEvent) {
        if event == CongestionEvent::Loss {
            trace!("{} {} RTO cwnd={} -> 1", subflow.trace_id(), self.name(), subflow.cwnd);
            subflow.cwnd = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion_control::tests::*;
    use crate::CongestionControlAlgorithm;

    #[test]
    fn reno_init() {
        let r = Reno::new();
        assert_eq!(r.name(), "RENO");
        assert_eq!(r.increase_ratio(), 0);
        assert_eq!(r.snd_buffer(), 0);
    }

    #[test]
    fn reno_slow_start() -> Result<()> {
        let (mut session, ids) = new_test_session(
            CongestionControlAlgorithm::Reno,
            false,
            &[TestSubflow::new(10, 20, 100_000)],
        )?;
        let sid = ids[0];

        session.on_ack_received(sid, 4)?;
        assert_eq!(session.get(sid)?.cwnd(), 14);

        // Crossing ssthresh: 6 segments for slow start, 2 left for
        // additive increase.
        session.on_ack_received(sid, 8)?;
        let sf = session.get(sid)?;
        assert_eq!(sf.cwnd(), 20);
        assert_eq!(sf.cwnd_cnt(), 2);
        Ok(())
    }

    #[test]
    fn reno_additive_increase() -> Result<()> {
        let (mut session, ids) = new_test_session(
            CongestionControlAlgorithm::Reno,
            false,
            &[TestSubflow::new(10, 5, 100_000)],
        )?;
        let sid = ids[0];

        for _ in 0..9 {
            session.on_ack_received(sid, 1)?;
        }
        assert_eq!(session.get(sid)?.cwnd(), 10);

        session.on_ack_received(sid, 1)?;
        assert_eq!(session.get(sid)?.cwnd(), 11);
        assert_eq!(session.get(sid)?.cwnd_cnt(), 0);

        // A stretch ack covering two windows.
        session.on_ack_received(sid, 23)?;
        assert_eq!(session.get(sid)?.cwnd(), 13);
        assert_eq!(session.get(sid)?.cwnd_cnt(), 1);
        Ok(())
    }

    #[test]
    fn reno_not_cwnd_limited() -> Result<()> {
        let (mut session, ids) = new_test_session(
            CongestionControlAlgorithm::Reno,
            false,
            &[TestSubflow::new(10, 20, 100_000)],
        )?;
        let sid = ids[0];
        session.get_mut(sid)?.set_cwnd_limited(false);

        session.on_ack_received(sid, 5)?;
        assert_eq!(session.get(sid)?.cwnd(), 10);
        Ok(())
    }

    #[test]
    fn reno_clamp() -> Result<()> {
        let (mut session, ids) = new_test_session(
            CongestionControlAlgorithm::Reno,
            false,
            &[TestSubflow::new(10, 20, 100_000)],
        )?;
        let sid = ids[0];
        session.get_mut(sid)?.set_cwnd_clamp(12);

        session.on_ack_received(sid, 5)?;
        assert_eq!(session.get(sid)?.cwnd(), 12);
        Ok(())
    }

    #[test]
    fn reno_ssthresh_and_timeout() -> Result<()> {
        let (mut session, ids) = new_test_session(
            CongestionControlAlgorithm::Reno,
            false,
            &[TestSubflow::new(10, 20, 100_000), TestSubflow::new(3, 20, 100_000)],
        )?;

        assert_eq!(session.ssthresh(ids[0])?, 5);
        assert_eq!(session.ssthresh(ids[1])?, 2);

        // Reno never applies the fast retransmit override.
        session.get_mut(ids[0])?.set_sacked_out(10);
        assert_eq!(session.ssthresh(ids[0])?, 5);
        assert_eq!(session.get(ids[0])?.cwnd(), 10);

        session.on_congestion_event(ids[0], CongestionEvent::Loss)?;
        assert_eq!(session.get(ids[0])?.cwnd(), 1);

        session.on_congestion_event(ids[1], CongestionEvent::TxStart)?;
        assert_eq!(session.get(ids[1])?.cwnd(), 3);
        Ok(())
    }
}
