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

//! Fixed-point arithmetic over the bandwidth pool of a multipath session.
//!
//! The bandwidth of a subflow is estimated as `cwnd / srtt` (segments per
//! microsecond) and kept in fixed point, shifted left by `scale` bits. All
//! intermediate products use 128-bit saturating arithmetic.

use crate::session::subflow::Subflow;
use crate::session::subflow::SubflowMap;

/// Ceiling division. `d` must be non-zero.
fn div_round_up(n: u128, d: u128) -> u128 {
    n / d + u128::from(n % d != 0)
}

/// Scaled bandwidth estimate of a single subflow, or zero if the subflow
/// cannot send yet.
pub(crate) fn subflow_bandwidth(subflow: &Subflow, scale: u32) -> u128 {
    if !subflow.can_send() {
        return 0;
    }

    (u128::from(subflow.cwnd) << scale) / u128::from(subflow.srtt_us)
}

/// Total scaled bandwidth of all sendable subflows of the session.
pub fn bandwidth_share(subflows: &SubflowMap, scale: u32) -> u128 {
    subflows
        .iter()
        .map(|(_, sf)| subflow_bandwidth(sf, scale))
        .fold(0_u128, |total, bw| total.saturating_add(bw))
}

/// The pool window seen from a subflow: `(srtt * total) >> scale`.
///
/// For a subflow alone in its pool this is roughly its own cwnd.
fn pool_window(srtt_us: u64, total: u128, scale: u32) -> u128 {
    u128::from(srtt_us).saturating_mul(total) >> scale
}

/// Increase credit of a subflow for `factor` bytes of acknowledged data.
///
/// `ratio = ceil(cwnd * factor / max(1, pool_window))`. A subflow carrying
/// the whole pool earns `factor`; a subflow carrying a fraction of it earns
/// the same fraction of `factor`.
pub(crate) fn increase_ratio(subflow: &Subflow, total: u128, factor: u64, scale: u32) -> u64 {
    if factor == 0 || !subflow.can_send() {
        return 0;
    }

    let denominator = pool_window(subflow.srtt_us, total, scale).max(1);
    let numerator = u128::from(subflow.cwnd) * u128::from(factor);
    let ratio = div_round_up(numerator, denominator);

    u64::try_from(ratio).unwrap_or(u64::MAX)
}

/// Pool-aware window decrease of a subflow after a loss, in segments.
///
/// Half of the pool window, but never less than half of the subflow's own
/// window.
pub(crate) fn pool_decrease(subflow: &Subflow, total: u128, scale: u32) -> u64 {
    let decrease = div_round_up(pool_window(subflow.srtt_us, total, scale), 2);
    let own = div_round_up(u128::from(subflow.cwnd), 2);

    u64::try_from(decrease.max(own)).unwrap_or(u64::MAX)
}

/// Accumulator of fractional window increase credit, in bytes.
///
/// Credit is added on every acknowledgment and converted into one segment
/// of congestion window whenever a full MSS worth has been collected.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CreditAccumulator {
    credit: u64,
}

impl CreditAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add increase credit.
    pub fn add(&mut self, credit: u64) {
        self.credit = self.credit.saturating_add(credit);
    }

    /// Whether at least one segment worth of credit is available.
    pub fn has_segment(&self, mss: u32) -> bool {
        self.credit >= u64::from(mss)
    }

    /// Consume one segment worth of credit if available.
    pub fn try_consume(&mut self, mss: u32) -> bool {
        if !self.has_segment(mss) {
            return false;
        }

        self.credit -= u64::from(mss);
        true
    }

    /// Pending credit in bytes.
    pub fn credit(&self) -> u64 {
        self.credit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion_control::tests::*;
    use crate::CongestionControlAlgorithm;
    use crate::Result;
    use proptest::prelude::*;

    const SCALE: u32 = crate::DEFAULT_RP_SCALE;

    #[test]
    fn bandwidth_single_subflow() -> Result<()> {
        let (session, ids) = new_test_session(
            CongestionControlAlgorithm::CmtRpv2,
            true,
            &[TestSubflow::new(10, 20, 100_000)],
        )?;

        // (10 << 32) / 100000
        let total = bandwidth_share(session.subflows(), SCALE);
        assert_eq!(total, 429_496);
        assert_eq!(total, subflow_bandwidth(session.get(ids[0])?, SCALE));
        Ok(())
    }

    #[test]
    fn bandwidth_excludes_unsendable_subflows() -> Result<()> {
        let (mut session, ids) = new_test_session(
            CongestionControlAlgorithm::CmtRpv2,
            true,
            &[
                TestSubflow::new(10, 20, 100_000),
                TestSubflow::new(40, 20, 0),
                TestSubflow::new(30, 20, 50_000),
            ],
        )?;
        let with_inactive = bandwidth_share(session.subflows(), SCALE);

        // A subflow without RTT sample contributes nothing.
        assert_eq!(subflow_bandwidth(session.get(ids[1])?, SCALE), 0);

        // Neither does an inactive one.
        session.get_mut(ids[2])?.set_active(false);
        let without = bandwidth_share(session.subflows(), SCALE);
        assert_eq!(without, subflow_bandwidth(session.get(ids[0])?, SCALE));
        assert!(without < with_inactive);
        Ok(())
    }

    #[test]
    fn increase_ratio_single_subflow_scenario() -> Result<()> {
        let (session, ids) = new_test_session(
            CongestionControlAlgorithm::CmtRpv2,
            true,
            &[TestSubflow::new(10, 20, 100_000)],
        )?;
        let sf = session.get(ids[0])?;
        let total = bandwidth_share(session.subflows(), SCALE);

        // pool window = (100000 * 429496) >> 32 = 9, ceil(10 * 1460 / 9) = 1623
        assert_eq!(increase_ratio(sf, total, 1460, SCALE), 1623);
        assert_eq!(increase_ratio(sf, total, 0, SCALE), 0);
        Ok(())
    }

    #[test]
    fn increase_ratio_zero_pool() -> Result<()> {
        let (session, ids) = new_test_session(
            CongestionControlAlgorithm::CmtRpv2,
            true,
            &[TestSubflow::new(10, 20, 100_000)],
        )?;
        let sf = session.get(ids[0])?;

        // The denominator is clamped to one.
        assert_eq!(increase_ratio(sf, 0, 1460, SCALE), 14_600);
        Ok(())
    }

    #[test]
    fn increase_ratio_inverse_to_rtt() -> Result<()> {
        let (session, ids) = new_test_session(
            CongestionControlAlgorithm::CmtRpv2,
            true,
            &[
                TestSubflow::new(20, 10, 50_000),
                TestSubflow::new(20, 10, 100_000),
            ],
        )?;
        let total = bandwidth_share(session.subflows(), SCALE);
        let fast = increase_ratio(session.get(ids[0])?, total, 1460, SCALE);
        let slow = increase_ratio(session.get(ids[1])?, total, 1460, SCALE);

        // Shares are 2/3 and 1/3 of the pool; the truncated pool windows are
        // 29 and 59 segments.
        assert!(fast > slow);
        assert_eq!(fast, 1007);
        assert_eq!(slow, 495);
        Ok(())
    }

    #[test]
    fn decrease_floor_at_half_cwnd() -> Result<()> {
        let (session, ids) = new_test_session(
            CongestionControlAlgorithm::CmtRpv2,
            true,
            &[TestSubflow::new(11, 5, 100_000)],
        )?;
        let sf = session.get(ids[0])?;

        // The pool window is 10 due to truncation, half of it is 5, but
        // half of the own window rounds up to 6.
        assert_eq!(pool_decrease(sf, bandwidth_share(session.subflows(), SCALE), SCALE), 6);
        assert_eq!(pool_decrease(sf, 0, SCALE), 6);
        Ok(())
    }

    #[test]
    fn accumulator() {
        let mut acc = CreditAccumulator::new();
        assert!(!acc.try_consume(1460));

        acc.add(1000);
        assert!(!acc.has_segment(1460));
        acc.add(1000);
        assert!(acc.try_consume(1460));
        assert_eq!(acc.credit(), 540);
        assert!(!acc.try_consume(1460));

        acc.add(u64::MAX);
        assert_eq!(acc.credit(), u64::MAX);
    }

    #[test]
    fn accumulator_rechunking() {
        let mss = 1460;
        let chunkings: [&[u64]; 4] = [&[1460], &[730, 730], &[1, 1459], &[500, 500, 460]];

        for chunks in chunkings {
            let mut acc = CreditAccumulator::new();
            let mut increments = 0;
            for c in chunks {
                acc.add(*c);
                if acc.try_consume(mss) {
                    increments += 1;
                }
            }
            assert_eq!(increments, 1, "chunks {:?}", chunks);
            assert_eq!(acc.credit(), 0);
        }
    }

    proptest! {
        #[test]
        fn accumulator_rechunking_prop(cuts in proptest::collection::vec(1u64..1460, 0..20)) {
            let mss = 1460_u32;
            let mut points: Vec<u64> = cuts;
            points.push(0);
            points.push(u64::from(mss));
            points.sort();
            points.dedup();

            let mut acc = CreditAccumulator::new();
            let mut increments = 0;
            for w in points.windows(2) {
                acc.add(w[1] - w[0]);
                if acc.try_consume(mss) {
                    increments += 1;
                }
            }
            prop_assert_eq!(increments, 1);
            prop_assert_eq!(acc.credit(), 0);
        }

        #[test]
        fn bandwidth_share_order_invariant(
            flows in proptest::collection::vec((1u32..10_000, 0u64..1_000_000), 1..8)
        ) {
            let subflows: Vec<TestSubflow> = flows
                .iter()
                .map(|&(cwnd, srtt)| TestSubflow::new(cwnd, 10, srtt))
                .collect();
            let mut reversed = subflows.clone();
            reversed.reverse();

            let (a, _) = new_test_session(CongestionControlAlgorithm::CmtRpv2, true, &subflows)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let (b, _) = new_test_session(CongestionControlAlgorithm::CmtRpv2, true, &reversed)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            let expected: u128 = flows
                .iter()
                .filter(|(_, srtt)| *srtt > 0)
                .map(|&(cwnd, srtt)| (u128::from(cwnd) << SCALE) / u128::from(srtt))
                .sum();

            prop_assert_eq!(bandwidth_share(a.subflows(), SCALE), expected);
            prop_assert_eq!(bandwidth_share(b.subflows(), SCALE), expected);
        }
    }
}
