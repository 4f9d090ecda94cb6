// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance states and their protocol-level projection.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Lifecycle state of a provisioned instance, stored in the `state` enum type.
///
/// ```text
/// (none) --provision--> setup --success--> done
///                        setup --failure--> failed
/// done   --deprovision--> teardown --success--> gone
/// teardown --failure--> failed
/// ```
///
/// `InUse` exists in the database enum but no transition assigns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    /// Provisioning has started.
    Setup,
    /// Declared, never assigned.
    InUse,
    /// Deprovisioning has started.
    Teardown,
    /// The backing database exists and accepts bindings.
    Done,
    /// The backing database was dropped.
    Gone,
    /// Provisioning or teardown failed.
    Failed,
    /// The state could not be read.
    Error,
}

impl InstanceState {
    /// Every state, in enum declaration order.
    pub const ALL: [InstanceState; 7] = [
        InstanceState::Setup,
        InstanceState::InUse,
        InstanceState::Teardown,
        InstanceState::Done,
        InstanceState::Gone,
        InstanceState::Failed,
        InstanceState::Error,
    ];

    /// The label used by the `state` enum type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::InUse => "in-use",
            Self::Teardown => "teardown",
            Self::Done => "done",
            Self::Gone => "gone",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s.trim())
            .ok_or_else(|| Error::InvalidState(s.to_string()))
    }
}

/// Tri-state status reported to status polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Setup or teardown still running.
    InProgress,
    /// The last operation completed.
    Succeeded,
    /// The last operation failed, or the state is unreadable.
    Failed,
}

impl OperationState {
    /// Protocol label for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<InstanceState> for OperationState {
    type Error = Error;

    fn try_from(state: InstanceState) -> Result<Self, Self::Error> {
        match state {
            InstanceState::Setup | InstanceState::Teardown => Ok(Self::InProgress),
            InstanceState::Done | InstanceState::Gone => Ok(Self::Succeeded),
            InstanceState::Failed | InstanceState::Error => Ok(Self::Failed),
            InstanceState::InUse => Err(Error::InvalidState(state.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_labels_round_trip() {
        for state in InstanceState::ALL {
            assert_eq!(state.as_str().parse::<InstanceState>().unwrap(), state);
        }
    }

    #[test]
    fn test_state_parse_trims_padding() {
        assert_eq!(
            "done    ".parse::<InstanceState>().unwrap(),
            InstanceState::Done
        );
    }

    #[test]
    fn test_state_parse_unknown() {
        let err = "running".parse::<InstanceState>().unwrap_err();
        assert!(matches!(err, Error::InvalidState(s) if s == "running"));
    }

    #[test]
    fn test_operation_state_mapping() {
        let cases = [
            (InstanceState::Setup, OperationState::InProgress),
            (InstanceState::Teardown, OperationState::InProgress),
            (InstanceState::Done, OperationState::Succeeded),
            (InstanceState::Gone, OperationState::Succeeded),
            (InstanceState::Failed, OperationState::Failed),
            (InstanceState::Error, OperationState::Failed),
        ];
        for (state, expected) in cases {
            assert_eq!(OperationState::try_from(state).unwrap(), expected, "{state}");
        }
    }

    #[test]
    fn test_in_use_has_no_operation_state() {
        assert!(OperationState::try_from(InstanceState::InUse).is_err());
    }

    #[test]
    fn test_operation_state_labels() {
        assert_eq!(OperationState::InProgress.to_string(), "in progress");
        assert_eq!(OperationState::Succeeded.to_string(), "succeeded");
        assert_eq!(OperationState::Failed.to_string(), "failed");
    }
}
