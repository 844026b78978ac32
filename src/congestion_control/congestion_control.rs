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

#![allow(unused_variables)]

use core::str::FromStr;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::session::subflow::CaState;
use crate::session::subflow::CongestionEvent;
use crate::session::subflow::Subflow;
use crate::session::subflow::SubflowMap;
use crate::Config;
use crate::Error;
use crate::Result;
pub use cmt_rpv2::CmtRpv2;
pub use cmt_rpv2::CmtRpv2Config;
pub use pool::CreditAccumulator;
pub use reno::Reno;

/// Available congestion control algorithm
#[repr(C)]
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionControlAlgorithm {
    /// Reno is the standard TCP congestion control: slow start up to the
    /// threshold, then one segment of growth per window of acknowledgments,
    /// and halving on loss. Each subflow behaves as an independent flow.
    Reno,

    /// CMT/RPv2 couples the subflows of a multipath session. Each subflow
    /// grows in proportion to its share of the aggregate bandwidth and backs
    /// off according to the state of the whole pool, so that the session
    /// takes no more capacity than a single flow would.
    #[default]
    CmtRpv2,
}

impl FromStr for CongestionControlAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<CongestionControlAlgorithm> {
        if algor.eq_ignore_ascii_case("reno") {
            Ok(CongestionControlAlgorithm::Reno)
        } else if algor.eq_ignore_ascii_case("cmtrpv2") {
            Ok(CongestionControlAlgorithm::CmtRpv2)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// Congestion control interfaces shared by different algorithms.
///
/// A controller is owned by exactly one session. The session validates the
/// subflow identifier before calling into the controller, and all callbacks
/// take `&mut self`, so the per-session state of a controller is only ever
/// touched from one context at a time.
pub trait CongestionController {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// Callback for `acked` newly acknowledged segments on subflow `sid`.
    fn on_ack(&mut self, subflows: &mut SubflowMap, sid: usize, acked: u32) -> Result<()>;

    /// Compute the slow start threshold after a loss was detected on subflow
    /// `sid`. Implementations may also adjust the congestion window.
    fn ssthresh(&mut self, subflows: &mut SubflowMap, sid: usize) -> Result<u32>;

    /// Congestion event reported by the host stack.
    fn on_congestion_event(&mut self, subflow: &mut Subflow, event: CongestionEvent) {}

    /// Congestion avoidance state change reported by the host stack.
    fn on_state_change(&mut self, subflow: &mut Subflow, state: CaState) {}

    /// Check if the next acknowledgment on the subflow is handled by slow
    /// start.
    fn in_slow_start(&self, subflow: &Subflow, multipath: bool) -> bool {
        subflow.cwnd < subflow.ssthresh
    }

    /// The most recently computed increase ratio, scaled by the fixed-point
    /// shift. Zero for controllers without pool coupling.
    fn increase_ratio(&self) -> u64 {
        0
    }

    /// The pending increase credit of the session in bytes.
    fn snd_buffer(&self) -> u64 {
        0
    }
}

impl fmt::Debug for dyn CongestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller {}.", self.name())
    }
}

/// Build a congestion controller.
pub fn build_congestion_controller(conf: &Config) -> Box<dyn CongestionController> {
    match conf.congestion_control_algorithm {
        CongestionControlAlgorithm::Reno => Box::new(Reno::new()),
        CongestionControlAlgorithm::CmtRpv2 => Box::new(CmtRpv2::new(CmtRpv2Config::from(conf))),
    }
}


mod cmt_rpv2;
pub(crate) mod pool;
pub(crate) mod reno;
