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

//! Error type for congestion control operations.

use strum_macros::EnumIter;

/// Errors reported at the session boundary.
///
/// The window arithmetic itself never fails; these only describe misuse of
/// the session API by the host stack.
#[derive(Clone, Debug, Default, PartialEq, Eq, EnumIter)]
pub enum Error {
    /// The controller reached a state that should not be possible.
    #[default]
    InternalError,

    /// There is no more work to do.
    Done,

    /// The given subflow identifier is unknown to the session.
    InvalidSubflow(usize),

    /// The operation cannot be completed because it was attempted in an
    /// invalid state.
    InvalidState(String),

    /// The configuration is invalid.
    InvalidConfig(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidSubflow(id) => write!(f, "invalid subflow {id}"),
            Error::InvalidState(reason) => write!(f, "invalid state: {reason}"),
            Error::InvalidConfig(reason) => write!(f, "invalid config: {reason}"),
            _ => write!(f, "{self:?}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn error_display_not_empty() {
        for e in Error::iter() {
            assert!(!format!("{}", e).is_empty());
        }
    }

    #[test]
    fn error_display() {
        assert_eq!(format!("{}", Error::InvalidSubflow(3)), "invalid subflow 3");
        assert_eq!(
            format!("{}", Error::InvalidConfig("unknown".into())),
            "invalid config: unknown"
        );
        assert_eq!(format!("{}", Error::Done), "Done");
    }
}
