//! Download staging and operation exclusion tests.
//!
//! Tests cover:
//! - Integrity failures abort the whole staging transaction
//! - Optional files reported missing are skipped
//! - Concurrent mutating operations fail fast with OperationInProgress
//! - Download cancellation

mod support;

use std::sync::Arc;

use support::{rel, v, Gate, Harness};
use uplift_common::Error;
use uplift_core::operation::OperationKind;
use uplift_core::state::Phase;

fn assert_nothing_staged(h: &Harness) {
    let paths = h.manager.paths();
    assert!(!paths.staging_partial_dir().exists(), "partial staging left behind");
    assert!(!paths.staging_dir().exists(), "staging published");
    let state = h.state();
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(state.staged_version, None);
}

mod integrity {
    use super::*;

    #[test]
    fn checksum_mismatch_aborts_and_cleans_up() {
        let h = Harness::new();
        h.publish_next();
        h.remote.corrupt("1.3.0", "static/app.css");
        h.manager.check().unwrap();

        let err = h.manager.download(None).unwrap_err();
        match &err {
            Error::ChecksumMismatch { path, .. } => assert_eq!(path, "static/app.css"),
            other => panic!("expected checksum mismatch, got {other}"),
        }
        assert_nothing_staged(&h);
        assert!(h.state().last_error.unwrap().contains("static/app.css"));
        assert_eq!(h.read_live("main.py").unwrap(), "print('1.2.0')\n");
    }

    #[test]
    fn missing_required_file_aborts() {
        let h = Harness::with_config(|c| {
            c.required_files = vec!["VERSION".to_string(), "main.py".to_string()];
        });
        h.publish_next();
        h.remote.withhold("1.3.0", "main.py");
        h.manager.check().unwrap();

        let err = h.manager.download(None).unwrap_err();
        match &err {
            Error::MissingRequiredFile { path } => assert_eq!(path, "main.py"),
            other => panic!("expected missing required file, got {other}"),
        }
        assert_nothing_staged(&h);
    }

    #[test]
    fn optional_missing_file_is_skipped() {
        let h = Harness::new();
        h.publish_next();
        h.remote.withhold("1.3.0", "static/new.js");
        h.manager.check().unwrap();

        let report = h.manager.download(None).unwrap();
        assert_eq!(report.version, v("1.3.0"));
        assert_eq!(report.skipped, vec![rel("static/new.js")]);
        assert!(h.manager.paths().staging_dir().join("main.py").is_file());
        assert!(!h.manager.paths().staging_dir().join("static/new.js").exists());
    }

    #[test]
    fn version_file_must_match_target() {
        let h = Harness::new();
        h.remote.publish("1.3.0", &[("VERSION", "1.2.9\n"), ("main.py", "x")]);
        h.manager.check().unwrap();

        let err = h.manager.download(None).unwrap_err();
        assert!(matches!(err, Error::Remote(_)), "{err}");
        assert_nothing_staged(&h);
    }

    #[test]
    fn failed_download_keeps_previous_staged_release() {
        let h = Harness::new();
        h.publish_next();
        h.manager.check().unwrap();
        h.manager.download(None).unwrap();

        h.remote.publish("1.4.0", &[("main.py", "print('1.4.0')\n")]);
        h.remote.corrupt("1.4.0", "main.py");
        assert!(h.manager.download(Some(v("1.4.0"))).is_err());

        let state = h.state();
        assert_eq!(state.phase, Phase::Staged);
        assert_eq!(state.staged_version, Some(v("1.3.0")));
        assert!(h.manager.paths().staging_dir().join("main.py").is_file());
    }
}

mod preconditions {
    use super::*;

    #[test]
    fn download_without_known_update_fails() {
        let h = Harness::new();
        let err = h.manager.download(None).unwrap_err();
        assert!(matches!(err, Error::NoUpdateAvailable { .. }), "{err}");

        let last_error = h.manager.status().last_error.unwrap();
        assert!(last_error.contains("no update available"), "{last_error}");
    }

    #[test]
    fn download_refused_by_config_is_recorded() {
        let h = Harness::with_config(|c| c.enabled = false);
        let err = h.manager.download(Some(v("1.3.0"))).unwrap_err();
        assert!(matches!(err, Error::UpdatesDisabled { .. }), "{err}");
        assert!(h.state().last_error.unwrap().contains("updates are disabled"));
        assert_eq!(h.state().phase, Phase::Idle);
    }

    #[test]
    fn download_when_up_to_date_fails() {
        let h = Harness::new();
        h.remote.publish("1.2.0", &[("main.py", "same")]);
        h.manager.check().unwrap();
        let err = h.manager.download(None).unwrap_err();
        assert!(matches!(err, Error::NoUpdateAvailable { .. }), "{err}");
    }

    #[test]
    fn network_failure_during_download_is_recoverable() {
        let h = Harness::new();
        h.publish_next();
        h.manager.check().unwrap();
        h.remote.set_offline(true);

        let err = h.manager.download(None).unwrap_err();
        assert!(err.is_recoverable());
        assert_nothing_staged(&h);

        h.remote.set_offline(false);
        assert!(h.manager.download(None).is_ok());
    }
}

mod exclusion {
    use super::*;

    fn blocked_download(h: &Harness) -> (Arc<Gate>, uplift_core::OperationHandle) {
        h.publish_next();
        let gate = Arc::new(Gate::default());
        h.remote.block_on(gate.clone());
        let handle = h.manager.spawn_download(Some(v("1.3.0"))).unwrap();
        gate.wait_entered();
        (gate, handle)
    }

    #[test]
    fn concurrent_operations_get_operation_in_progress() {
        let h = Harness::new();
        let (gate, handle) = blocked_download(&h);

        let status = h.manager.status();
        let op = status.operation.expect("download visible in status");
        assert_eq!(op.kind, OperationKind::Download);
        assert_eq!(op.id, handle.id);

        for err in [
            h.manager.download(Some(v("1.3.0"))).map(|_| ()).unwrap_err(),
            h.manager.apply().map(|_| ()).unwrap_err(),
            h.manager.confirm().map(|_| ()).unwrap_err(),
            h.manager.rollback().map(|_| ()).unwrap_err(),
            h.manager.enable().unwrap_err(),
        ] {
            assert!(matches!(err, Error::OperationInProgress { .. }), "{err}");
        }

        // Another process sees the cross-process lock.
        let other = h.other_process();
        assert!(matches!(
            other.download(Some(v("1.3.0"))).unwrap_err(),
            Error::OperationInProgress { .. }
        ));

        gate.open();
        let result = handle.join().unwrap();
        assert!(result.ok, "{:?}", result.error);
        assert_eq!(h.remote.opened(), 1);
        assert!(h.manager.status().operation.is_none());
        assert_eq!(h.state().staged_version, Some(v("1.3.0")));
    }

    #[test]
    fn check_does_not_wait_for_a_running_download() {
        let h = Harness::new();
        let (gate, handle) = blocked_download(&h);

        assert!(h.manager.check().unwrap().is_update_available());

        gate.open();
        handle.join().unwrap();
    }

    #[test]
    fn cancelled_download_discards_partial_staging() {
        let h = Harness::new();
        let (gate, handle) = blocked_download(&h);

        assert!(h.manager.cancel_download());
        gate.open();
        let result = handle.join().unwrap();

        assert!(!result.ok);
        assert_eq!(result.error.unwrap().kind, "cancelled");
        assert_nothing_staged(&h);
        assert!(!h.manager.cancel_download());
        assert_eq!(h.manager.status().last_result.unwrap().id, result.id);
    }
}
