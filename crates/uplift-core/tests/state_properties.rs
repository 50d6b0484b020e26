//! Property-based tests for the persisted state record.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use tempfile::tempdir;
use uplift_common::{DisabledReason, Error, Version};
use uplift_core::logging::LogContext;
use uplift_core::state::{Phase, StateStore, UpdateState};
use uplift_core::UpdatePaths;

fn version() -> impl Strategy<Value = Version> {
    (0u64..20, 0u64..20, 0u64..20).prop_map(|(a, b, c)| Version::new(a, b, c))
}

fn timestamp() -> impl Strategy<Value = Option<DateTime<Utc>>> {
    proptest::option::of((1_500_000_000i64..2_000_000_000).prop_map(|secs| {
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }))
}

fn phase() -> impl Strategy<Value = Phase> {
    prop_oneof![
        Just(Phase::Idle),
        Just(Phase::Downloading),
        Just(Phase::Staged),
        Just(Phase::Applying),
        Just(Phase::PendingVerification),
        Just(Phase::RollingBack),
    ]
}

fn disabled() -> impl Strategy<Value = (bool, Option<DisabledReason>)> {
    prop_oneof![
        Just((false, None)),
        Just((true, None)),
        Just((true, Some(DisabledReason::FailureLimit))),
        Just((true, Some(DisabledReason::RestoreFailed))),
    ]
}

/// States satisfying every lifecycle invariant.
fn valid_state() -> impl Strategy<Value = UpdateState> {
    (
        version(),
        proptest::option::of(version()),
        proptest::option::of(version()),
        phase(),
        0u32..3,
        0u32..5,
        disabled(),
        proptest::option::of(version()),
        (timestamp(), timestamp()),
        proptest::option::of("[a-z ]{0,40}"),
    )
        .prop_map(
            |(current, available, staged, phase, starts, failures, disabled, backup, times, error)| {
                let pending = phase == Phase::PendingVerification;
                let staged = match phase {
                    Phase::Staged => staged.or(Some(current)),
                    _ => staged,
                };
                UpdateState {
                    current_version: current,
                    available_version: available,
                    staged_version: staged,
                    phase,
                    pending_verification: pending,
                    verification_starts: if pending { starts } else { 0 },
                    consecutive_failures: failures,
                    updates_disabled: disabled.0,
                    disabled_reason: disabled.1,
                    backup_version: backup,
                    last_check: times.0,
                    last_update: times.1,
                    last_error: error,
                    ..UpdateState::default()
                }
            },
        )
}

fn store(dir: &std::path::Path) -> StateStore {
    let paths = UpdatePaths::new(dir.join("app"), dir.join(".update"));
    StateStore::new(&paths, LogContext::new("run-test", "host-test"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Whatever the store writes, it reads back unchanged.
    #[test]
    fn saved_state_loads_back(state in valid_state()) {
        prop_assert!(state.check_invariants().is_ok());
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.save(&state).unwrap();
        prop_assert_eq!(store.load().unwrap(), state);
    }

    /// A pending flag that disagrees with the phase never loads.
    #[test]
    fn pending_flag_must_match_phase(state in valid_state()) {
        let mut broken = state;
        broken.pending_verification = !broken.pending_verification;
        prop_assert!(broken.check_invariants().is_err());

        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.save(&broken).unwrap();
        let is_corrupt = matches!(store.load(), Err(Error::StateCorruption { .. }));
        prop_assert!(is_corrupt);
    }

    /// The failure counter never exceeds the limit, and reaching the limit
    /// disables updates.
    #[test]
    fn failure_counter_saturates(max in 1u32..6, failures in 0usize..20) {
        let mut state = UpdateState::default();
        for _ in 0..failures {
            state.register_failure(max);
            prop_assert!(state.consecutive_failures <= max);
        }
        prop_assert_eq!(state.updates_disabled, failures as u32 >= max);
        if state.updates_disabled {
            prop_assert_eq!(state.disabled_reason, Some(DisabledReason::FailureLimit));
        }
    }

    /// Updates inside the store keep the invariants, or are refused.
    #[test]
    fn update_refuses_inconsistent_results(state in valid_state(), flip in any::<bool>()) {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.save(&state).unwrap();

        let result = store.update(|s| {
            if flip {
                s.pending_verification = !s.pending_verification;
            } else {
                s.last_error = None;
            }
            Ok(())
        });
        prop_assert_eq!(result.is_ok(), !flip);
        let on_disk = store.load().unwrap();
        if flip {
            prop_assert_eq!(on_disk, state);
        } else {
            prop_assert_eq!(on_disk.last_error, None);
        }
    }
}
