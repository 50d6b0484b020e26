//! Shared fixtures for uplift-core integration tests.
//!
//! `InMemoryRemote` serves releases published by the test, `RecordingRestart`
//! counts restart requests, and `Harness` wires both into an `UpdateManager`
//! rooted in a temporary directory.

#![allow(dead_code)]
// Test support intentionally provides more helpers than any single test uses.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use uplift_common::{sha256_hex, Error, RelPath, Result, Version};
use uplift_config::{PathsConfig, RestartConfig, UpdateConfig};
use uplift_core::logging::LogContext;
use uplift_core::remote::{
    ManifestEntry, MemoryPayload, ReleaseManifest, ReleasePayload, RemoteSource,
};
use uplift_core::restart::RestartTrigger;
use uplift_core::state::UpdateState;
use uplift_core::UpdateManager;

pub fn v(s: &str) -> Version {
    Version::parse(s).expect("valid version")
}

pub fn rel(s: &str) -> RelPath {
    RelPath::new(s).expect("valid relative path")
}

pub fn test_context() -> LogContext {
    LogContext::new("run-test", "host-test")
}

/// Write `files` under `root`, creating parents.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, body) in files {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(full, body).expect("write file");
    }
}

/// Blocks `open_release` until opened, so a test can hold a download
/// in flight.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
    entered: AtomicBool,
}

impl Gate {
    fn pass(&self) {
        self.entered.store(true, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    /// Wait until a caller is blocked on the gate.
    pub fn wait_entered(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.entered.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "gate never entered");
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

#[derive(Debug, Clone, Default)]
struct FakeRelease {
    files: BTreeMap<RelPath, Vec<u8>>,
    checksums: BTreeMap<RelPath, String>,
    /// Declared in the manifest but not served.
    missing: Vec<RelPath>,
}

/// A remote source backed by releases published from the test.
#[derive(Default)]
pub struct InMemoryRemote {
    releases: Mutex<BTreeMap<Version, FakeRelease>>,
    latest: Mutex<Option<Version>>,
    offline: AtomicBool,
    gate: Mutex<Option<Arc<Gate>>>,
    opened: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a release. A `VERSION` file is added unless given, and every
    /// file gets a correct checksum.
    pub fn publish(&self, version: &str, files: &[(&str, &str)]) {
        let version = v(version);
        let mut release = FakeRelease::default();
        for (path, body) in files {
            release.files.insert(rel(path), body.as_bytes().to_vec());
        }
        release
            .files
            .entry(rel("VERSION"))
            .or_insert_with(|| format!("{}\n", version).into_bytes());
        for (path, bytes) in &release.files {
            release.checksums.insert(path.clone(), sha256_hex(bytes));
        }
        self.releases.lock().unwrap().insert(version, release);

        let mut latest = self.latest.lock().unwrap();
        if latest.map_or(true, |l| version > l) {
            *latest = Some(version);
        }
    }

    /// Announce `version` as newest without changing any release content.
    pub fn set_latest(&self, version: &str) {
        *self.latest.lock().unwrap() = Some(v(version));
    }

    /// Declare a wrong checksum for one file.
    pub fn corrupt(&self, version: &str, path: &str) {
        let mut releases = self.releases.lock().unwrap();
        let release = releases.get_mut(&v(version)).expect("published release");
        release.checksums.insert(rel(path), "0".repeat(64));
    }

    /// Keep `path` in the manifest but stop serving it.
    pub fn withhold(&self, version: &str, path: &str) {
        let mut releases = self.releases.lock().unwrap();
        let release = releases.get_mut(&v(version)).expect("published release");
        release.files.remove(&rel(path));
        release.checksums.remove(&rel(path));
        release.missing.push(rel(path));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next `open_release` calls block on `gate`.
    pub fn block_on(&self, gate: Arc<Gate>) {
        *self.gate.lock().unwrap() = Some(gate);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network {
                url: "memory://releases".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

impl RemoteSource for InMemoryRemote {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn latest_version(&self) -> Result<Version> {
        self.ensure_online()?;
        self.latest
            .lock()
            .unwrap()
            .ok_or_else(|| Error::Remote("nothing published".to_string()))
    }

    fn open_release(&self, version: &Version) -> Result<Box<dyn ReleasePayload>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.pass();
        }
        self.ensure_online()?;

        let release = self
            .releases
            .lock()
            .unwrap()
            .get(version)
            .cloned()
            .ok_or_else(|| Error::Remote(format!("no release {}", version)))?;

        let mut files: Vec<ManifestEntry> = release
            .files
            .keys()
            .chain(release.missing.iter())
            .map(|path| ManifestEntry {
                path: path.clone(),
                checksum: release.checksums.get(path).cloned(),
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let manifest = ReleaseManifest {
            version: *version,
            files,
        };
        Ok(Box::new(MemoryPayload::new(manifest, release.files)))
    }
}

/// Counts restart requests; can be told to fail.
#[derive(Default)]
pub struct RecordingRestart {
    count: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingRestart {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl RestartTrigger for RecordingRestart {
    fn request_restart(&self) -> Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Restart("supervisor unavailable".to_string()));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

/// A live tree, state directory and manager in a temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub config: UpdateConfig,
    pub remote: Arc<InMemoryRemote>,
    pub restart: Arc<RecordingRestart>,
    pub manager: UpdateManager,
}

impl Harness {
    /// Live tree at 1.2.0 with `static/` updateable.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut UpdateConfig)) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let mut config = UpdateConfig {
            paths: PathsConfig {
                live_dir: dir.path().join("app"),
                state_dir: Some(dir.path().join(".update")),
                version_file: None,
            },
            restart: RestartConfig::None,
            updateable_dirs: vec!["static".to_string()],
            ..UpdateConfig::default()
        };
        adjust(&mut config);

        write_tree(
            &config.paths.live_dir,
            &[
                ("VERSION", "1.2.0\n"),
                ("main.py", "print('1.2.0')\n"),
                ("static/app.css", "body { color: red }\n"),
                ("static/old.js", "legacy()\n"),
                ("data/settings.json", "{\"user\": true}\n"),
            ],
        );

        let remote = Arc::new(InMemoryRemote::new());
        let restart = Arc::new(RecordingRestart::default());
        let manager = UpdateManager::new(
            config.clone(),
            remote.clone(),
            restart.clone(),
            test_context(),
        );
        Self {
            dir,
            config,
            remote,
            restart,
            manager,
        }
    }

    /// A fresh manager over the same directories, as a restarted process
    /// would build.
    pub fn restart_process(&mut self) -> &UpdateManager {
        self.manager = self.other_process();
        &self.manager
    }

    /// A second manager over the same directories, as another process
    /// (CLI next to the daemon) would build.
    pub fn other_process(&self) -> UpdateManager {
        UpdateManager::new(
            self.config.clone(),
            self.remote.clone(),
            self.restart.clone(),
            test_context(),
        )
    }

    pub fn live_dir(&self) -> PathBuf {
        self.config.paths.live_dir.clone()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.manager.paths().state_dir.clone()
    }

    pub fn read_live(&self, path: &str) -> Option<String> {
        fs::read_to_string(self.live_dir().join(path)).ok()
    }

    /// The persisted state record.
    pub fn state(&self) -> UpdateState {
        let bytes = fs::read(self.manager.paths().state_file()).expect("state file");
        serde_json::from_slice(&bytes).expect("state decodes")
    }

    /// Publish 1.3.0: changes `main.py`, drops `static/old.js`, adds
    /// `static/new.js`.
    pub fn publish_next(&self) {
        self.remote.publish(
            "1.3.0",
            &[
                ("main.py", "print('1.3.0')\n"),
                ("static/app.css", "body { color: blue }\n"),
                ("static/new.js", "modern()\n"),
            ],
        );
    }

    /// check, download and apply the newest release.
    pub fn update_to_latest(&self) {
        let outcome = self.manager.check().expect("check");
        assert!(outcome.is_update_available(), "{:?}", outcome);
        self.manager.download(None).expect("download");
        self.manager.apply().expect("apply");
    }
}
