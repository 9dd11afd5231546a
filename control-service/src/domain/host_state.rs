//! # Host State Machine
//!
//! A host's protection state is a pure function of its configuration plus
//! the current date. It is recomputed on every host write and by the daily
//! go-live cron, then persisted so listing queries stay cheap.
//!
//! ```text
//! ¬is_active                                       → archived
//! worker_id = NULL                                 → unprotected
//! block_all_traffic                                → locked
//! deployment_mode ∧ (golive_date = NULL
//!                    ∨ golive_date > today)        → deployment
//! otherwise                                        → protected
//! ```
//!
//! The checks are ordered: an archived host is archived even if it is also
//! locked, and lockdown wins over deployment mode.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Derived protection state of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    /// Host is decommissioned (`is_active = false`)
    Archived,
    /// Active host with no worker assigned yet
    Unprotected,
    /// Security lockdown active (`block_all_traffic = true`)
    Locked,
    /// Deployment mode with no go-live date or a future one
    Deployment,
    /// Normal operation with a worker assigned
    Protected,
}

impl HostState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Archived => "archived",
            Self::Unprotected => "unprotected",
            Self::Locked => "locked",
            Self::Deployment => "deployment",
            Self::Protected => "protected",
        }
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The inputs the state derivation depends on, extracted from a host row.
///
/// Kept as a separate struct so tests (and the cron) can evaluate the state
/// function without constructing full entities.
#[derive(Debug, Clone, Copy)]
pub struct HostStateInput {
    pub is_active: bool,
    pub has_worker: bool,
    pub block_all_traffic: bool,
    pub deployment_mode: bool,
    pub golive_date: Option<NaiveDate>,
}

/// Derives the host state for `today`.
pub fn derive_state(input: HostStateInput, today: NaiveDate) -> HostState {
    if !input.is_active {
        HostState::Archived
    } else if !input.has_worker {
        HostState::Unprotected
    } else if input.block_all_traffic {
        HostState::Locked
    } else if input.deployment_mode
        && input.golive_date.map_or(true, |date| date > today)
    {
        HostState::Deployment
    } else {
        HostState::Protected
    }
}

impl crate::domain::entities::Host {
    /// State input extracted from this host row.
    pub fn state_input(&self) -> HostStateInput {
        HostStateInput {
            is_active: self.is_active,
            has_worker: self.worker_id.is_some(),
            block_all_traffic: self.block_all_traffic,
            deployment_mode: self.deployment_mode,
            golive_date: self.golive_date,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 15).unwrap()
    }

    fn base() -> HostStateInput {
        HostStateInput {
            is_active: true,
            has_worker: true,
            block_all_traffic: false,
            deployment_mode: false,
            golive_date: None,
        }
    }

    #[test]
    fn test_inactive_host_is_archived() {
        let input = HostStateInput { is_active: false, ..base() };
        assert_eq!(derive_state(input, today()), HostState::Archived);
    }

    #[test]
    fn test_archived_wins_over_everything() {
        let input = HostStateInput {
            is_active: false,
            has_worker: false,
            block_all_traffic: true,
            deployment_mode: true,
            golive_date: None,
        };
        assert_eq!(derive_state(input, today()), HostState::Archived);
    }

    #[test]
    fn test_no_worker_is_unprotected() {
        let input = HostStateInput { has_worker: false, ..base() };
        assert_eq!(derive_state(input, today()), HostState::Unprotected);
    }

    #[test]
    fn test_lockdown_is_locked() {
        let input = HostStateInput { block_all_traffic: true, ..base() };
        assert_eq!(derive_state(input, today()), HostState::Locked);
    }

    #[test]
    fn test_lockdown_wins_over_deployment() {
        let input = HostStateInput {
            block_all_traffic: true,
            deployment_mode: true,
            ..base()
        };
        assert_eq!(derive_state(input, today()), HostState::Locked);
    }

    #[test]
    fn test_deployment_without_golive_date() {
        let input = HostStateInput { deployment_mode: true, ..base() };
        assert_eq!(derive_state(input, today()), HostState::Deployment);
    }

    #[test]
    fn test_deployment_with_future_golive_date() {
        let input = HostStateInput {
            deployment_mode: true,
            golive_date: Some(today() + chrono::Duration::days(10)),
            ..base()
        };
        assert_eq!(derive_state(input, today()), HostState::Deployment);
    }

    #[test]
    fn test_golive_today_means_protected() {
        // golive_date > today is required for deployment; the boundary day
        // itself already counts as live.
        let input = HostStateInput {
            deployment_mode: true,
            golive_date: Some(today()),
            ..base()
        };
        assert_eq!(derive_state(input, today()), HostState::Protected);
    }

    #[test]
    fn test_past_golive_date_means_protected() {
        let input = HostStateInput {
            deployment_mode: true,
            golive_date: Some(today() - chrono::Duration::days(1)),
            ..base()
        };
        assert_eq!(derive_state(input, today()), HostState::Protected);
    }

    #[test]
    fn test_plain_host_is_protected() {
        assert_eq!(derive_state(base(), today()), HostState::Protected);
    }
}
