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

//! MPCC is a congestion control library for multipath transports.
//!
//! It implements CMT/RPv2 (Concurrent Multipath Transfer with Resource
//! Pooling, version 2): every subflow of a multipath session grows and
//! shrinks its congestion window in proportion to its share of the
//! aggregate bandwidth, so that the session as a whole competes like a
//! single well-behaved flow while each subflow still reacts to its own
//! loss and RTT signals.
//!
//! The library only decides window sizes. The host transport owns sockets,
//! timers, RTT measurement, SACK processing and packet scheduling, and feeds
//! the resulting signals into a [`Session`].
//!
//! ## Get started
//!
//! ```
//! use std::time::Duration;
//! use mpcc::{CongestionControlAlgorithm, Config, Session};
//!
//! let mut conf = Config::new();
//! conf.set_congestion_control_algorithm(CongestionControlAlgorithm::CmtRpv2);
//!
//! let mut session = Session::new(&conf);
//! session.enable_multipath();
//!
//! let sid = session.insert_subflow("path-0")?;
//! session.get_mut(sid)?.set_srtt(Duration::from_millis(50));
//! session.on_ack_received(sid, 1)?;
//! # Ok::<(), mpcc::Error>(())
//! ```

#![allow(unused_imports)]

use std::cmp;

use serde::Deserialize;
use serde::Serialize;

/// Default fixed-point shift used for bandwidth estimates.
pub const DEFAULT_RP_SCALE: u32 = 32;

/// Upper limit of the fixed-point shift.
///
/// Scaled bandwidths are kept in 128-bit integers; a window of 2^32 segments
/// shifted by this amount still leaves headroom for summing subflows.
pub const MAX_RP_SCALE: u32 = 48;

/// Default number of SACKed segments that triggers fast retransmit.
pub const DEFAULT_DUP_ACK_THRESHOLD: u32 = 3;

/// Default maximum segment size in bytes.
pub const DEFAULT_MSS: u32 = 1460;

/// Default initial congestion window in segments.
/// See RFC 6928.
const DEFAULT_INITIAL_CWND: u32 = 10;

/// The slow start threshold used until the first loss.
pub const INFINITE_SSTHRESH: u32 = 0x7fff_ffff;

/// Default maximum number of subflows per session.
const DEFAULT_MAX_SUBFLOWS: usize = 8;

/// Result type for congestion control operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations about a multipath congestion control session.
///
/// All parameters are scoped to the sessions built from the configuration,
/// so different sessions in the same process may be tuned independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The congestion control algorithm used by the session.
    pub(crate) congestion_control_algorithm: CongestionControlAlgorithm,

    /// Fixed-point shift applied to bandwidth estimates.
    pub(crate) rp_scale: u32,

    /// Number of SACKed segments at which the reduced window is entered
    /// immediately.
    pub(crate) dup_ack_threshold: u32,

    /// The initial congestion window of a subflow in segments.
    pub(crate) initial_congestion_window: u32,

    /// The initial slow start threshold of a subflow in segments.
    pub(crate) initial_ssthresh: u32,

    /// The upper bound of the congestion window of a subflow in segments.
    pub(crate) cwnd_clamp: u32,

    /// The maximum segment size assumed for new subflows in bytes.
    pub(crate) max_segment_size: u32,

    /// The maximum number of concurrent subflows.
    pub(crate) max_subflows: usize,
}

impl Config {
    /// Create default configuration.
    ///
    /// The configuration may be customized by calling related set methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the congestion control algorithm that the session would use.
    /// The default value is CmtRpv2.
    pub fn set_congestion_control_algorithm(&mut self, cca: CongestionControlAlgorithm) {
        self.congestion_control_algorithm = cca;
    }

    /// Set the fixed-point shift for bandwidth estimates.
    /// The default value is 32. Values are clamped to `[1, MAX_RP_SCALE]`.
    pub fn set_rp_scale(&mut self, v: u32) {
        self.rp_scale = v.clamp(1, MAX_RP_SCALE);
    }

    /// Set the number of SACKed segments that triggers fast retransmit.
    /// The default value is 3. Zero is treated as 1.
    pub fn set_dup_ack_threshold(&mut self, v: u32) {
        self.dup_ack_threshold = cmp::max(v, 1);
    }

    /// Set the initial congestion window in segments.
    /// The default value is 10.
    pub fn set_initial_congestion_window(&mut self, segments: u32) {
        self.initial_congestion_window = cmp::max(segments, 1);
    }

    /// Set the initial slow start threshold in segments.
    /// The default value is `INFINITE_SSTHRESH`.
    pub fn set_initial_ssthresh(&mut self, segments: u32) {
        self.initial_ssthresh = cmp::max(segments, 1);
    }

    /// Set the upper bound of the congestion window in segments.
    /// The default value is the maximum value of u32.
    pub fn set_cwnd_clamp(&mut self, segments: u32) {
        self.cwnd_clamp = cmp::max(segments, 1);
    }

    /// Set the maximum segment size of new subflows in bytes.
    /// The default value is 1460.
    pub fn set_max_segment_size(&mut self, v: u32) {
        self.max_segment_size = cmp::max(v, 1);
    }

    /// Set the maximum number of concurrent subflows.
    /// The default value is 8.
    pub fn set_max_subflows(&mut self, v: usize) {
        self.max_subflows = cmp::max(v, 1);
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            congestion_control_algorithm: CongestionControlAlgorithm::CmtRpv2,
            rp_scale: DEFAULT_RP_SCALE,
            dup_ack_threshold: DEFAULT_DUP_ACK_THRESHOLD,
            initial_congestion_window: DEFAULT_INITIAL_CWND,
            initial_ssthresh: INFINITE_SSTHRESH,
            cwnd_clamp: u32::MAX,
            max_segment_size: DEFAULT_MSS,
            max_subflows: DEFAULT_MAX_SUBFLOWS,
        }
    }
}


pub use crate::congestion_control::CongestionControlAlgorithm;
pub use crate::congestion_control::CongestionController;
pub use crate::error::Error;
pub use crate::session::subflow::CaState;
pub use crate::session::subflow::CongestionEvent;
pub use crate::session::subflow::CongestionStats;
pub use crate::session::subflow::Subflow;
pub use crate::session::Session;

#[path = "congestion_control/congestion_control.rs"]
pub mod congestion_control;

#[path = "session/session.rs"]
pub mod session;

pub mod error;
