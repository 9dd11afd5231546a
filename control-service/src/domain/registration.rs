//! # Worker Registration Decision
//!
//! Registration is an idempotent POST a worker makes on startup, carrying
//! its name (`X-Worker-ID`) and the hostname it fronts. What happens depends
//! on how the host is currently bound:
//!
//! | host binding | pending migration | outcome |
//! |--------------|-------------------|---------|
//! | same worker | any | re-registration (no change) |
//! | any | pending = requester | migration (atomic swap) |
//! | none | none | initial bind |
//! | other worker | none or other | conflict (rejected) |
//!
//! The decision itself is pure; the repository performs the resulting swap
//! in a single transaction so observers never see a half-migrated host.

/// Outcome of a worker registration attempt against one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The host is already bound to the requesting worker. No change.
    ReRegistered,
    /// An admin scheduled a migration to this worker; perform the swap.
    Migrated,
    /// The host has no worker yet; bind it to the requester.
    InitialBind,
    /// The host is bound to another worker and no matching migration is
    /// pending. Rejected.
    Conflict,
}

/// Decides the outcome from the host's current binding.
///
/// * `current_worker_name` - name of the worker the host is bound to, if any
/// * `pending_worker_name` - admin-scheduled migration target, if any
/// * `requesting_worker_name` - the `X-Worker-ID` of the caller
pub fn decide_registration(
    current_worker_name: Option<&str>,
    pending_worker_name: Option<&str>,
    requesting_worker_name: &str,
) -> RegistrationOutcome {
    if current_worker_name == Some(requesting_worker_name) {
        return RegistrationOutcome::ReRegistered;
    }
    if pending_worker_name == Some(requesting_worker_name) {
        return RegistrationOutcome::Migrated;
    }
    if current_worker_name.is_none() {
        return RegistrationOutcome::InitialBind;
    }
    RegistrationOutcome::Conflict
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_worker_is_idempotent() {
        assert_eq!(
            decide_registration(Some("prod-worker-001"), None, "prod-worker-001"),
            RegistrationOutcome::ReRegistered
        );
    }

    #[test]
    fn test_re_registration_wins_over_pending() {
        // A host can have a pending migration while its current worker keeps
        // re-registering; only the pending worker triggers the swap.
        assert_eq!(
            decide_registration(
                Some("prod-worker-001"),
                Some("prod-worker-002"),
                "prod-worker-001"
            ),
            RegistrationOutcome::ReRegistered
        );
    }

    #[test]
    fn test_pending_worker_triggers_migration() {
        assert_eq!(
            decide_registration(
                Some("prod-worker-001"),
                Some("prod-worker-002"),
                "prod-worker-002"
            ),
            RegistrationOutcome::Migrated
        );
    }

    #[test]
    fn test_unbound_host_accepts_initial_bind() {
        assert_eq!(
            decide_registration(None, None, "prod-worker-001"),
            RegistrationOutcome::InitialBind
        );
    }

    #[test]
    fn test_unbound_host_with_matching_pending_migrates() {
        // Pending match is checked before the unbound case; either way the
        // requester ends up bound, but migration clears the pending fields.
        assert_eq!(
            decide_registration(None, Some("prod-worker-002"), "prod-worker-002"),
            RegistrationOutcome::Migrated
        );
    }

    #[test]
    fn test_foreign_worker_conflicts() {
        assert_eq!(
            decide_registration(Some("prod-worker-001"), None, "prod-worker-003"),
            RegistrationOutcome::Conflict
        );
        assert_eq!(
            decide_registration(
                Some("prod-worker-001"),
                Some("prod-worker-002"),
                "prod-worker-003"
            ),
            RegistrationOutcome::Conflict
        );
    }
}
