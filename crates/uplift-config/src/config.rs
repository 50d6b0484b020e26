//! Update configuration types.
//!
//! Every field has a default, so an empty `uplift.toml` (or none at all)
//! yields a usable configuration once `source.repo` is filled in.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::validate::{ValidationError, ValidationResult};

/// Complete update configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Master switch. When false, check/download/apply are refused.
    pub enabled: bool,

    pub source: SourceConfig,

    pub restart: RestartConfig,

    pub paths: PathsConfig,

    /// Release-relative directories where files absent from a new release
    /// are deleted from the live tree.
    pub updateable_dirs: Vec<String>,

    /// Files every release must contain.
    pub required_files: Vec<String>,

    /// Extensions picked up by branch-mode file discovery.
    pub file_extensions: Vec<String>,

    /// Release-relative directories never downloaded, whatever their
    /// file extensions.
    pub exclude_dirs: Vec<String>,

    pub auto_check: bool,
    pub auto_check_hours: u64,
    pub auto_download: bool,
    pub auto_apply: bool,

    pub max_consecutive_failures: u32,
    pub verification_window_secs: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source: SourceConfig::default(),
            restart: RestartConfig::default(),
            paths: PathsConfig::default(),
            updateable_dirs: Vec::new(),
            required_files: vec!["VERSION".to_string()],
            file_extensions: [
                ".py", ".md", ".html", ".css", ".js", ".json", ".txt", ".png", ".jpg", ".jpeg",
                ".gif", ".ico", ".webp", ".svg",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            exclude_dirs: Vec::new(),
            auto_check: true,
            auto_check_hours: 24,
            auto_download: false,
            auto_apply: false,
            max_consecutive_failures: 2,
            verification_window_secs: 60,
        }
    }
}

impl UpdateConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> ValidationResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(text: &str) -> ValidationResult<Self> {
        toml::from_str(text)
            .map_err(|e| ValidationError::ParseError(format!("Invalid TOML: {}", e)))
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> ValidationResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ValidationError::ParseError(format!("Cannot render TOML: {}", e)))
    }
}

/// Where releases come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(flatten)]
    pub strategy: SourceStrategy,

    /// Bound on every network request, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_raw_base")]
    pub raw_base: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            strategy: SourceStrategy::Branch {
                repo: String::new(),
                branch: default_branch(),
                subdir: default_subdir(),
            },
            timeout_secs: default_timeout_secs(),
            api_base: default_api_base(),
            raw_base: default_raw_base(),
            user_agent: default_user_agent(),
        }
    }
}

/// Remote strategy, selected by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceStrategy {
    /// Individual files fetched from a git branch.
    Branch {
        repo: String,
        #[serde(default = "default_branch")]
        branch: String,
        /// Directory of the repository holding the application tree.
        #[serde(default = "default_subdir")]
        subdir: String,
    },

    /// A tagged release with one zip asset plus a checksum manifest asset.
    Release {
        repo: String,
        #[serde(default = "default_tag_prefix")]
        tag_prefix: String,
        #[serde(default = "default_asset_suffix")]
        asset_suffix: String,
        #[serde(default = "default_checksums_asset")]
        checksums_asset: String,
        /// Directory inside the archive holding the application tree.
        #[serde(default)]
        subdir: String,
    },

    /// A local mirror laid out like the branch strategy's sub-directory.
    Directory { path: PathBuf },
}

impl SourceStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            SourceStrategy::Branch { .. } => "branch",
            SourceStrategy::Release { .. } => "release",
            SourceStrategy::Directory { .. } => "directory",
        }
    }
}

/// How the host process is restarted after apply and rollback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestartConfig {
    /// `systemctl restart <service>`, optionally through `sudo`.
    Systemctl {
        service: String,
        #[serde(default = "default_true")]
        use_sudo: bool,
    },

    /// An arbitrary command.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },

    /// Do not restart; the host handles it.
    #[default]
    None,
}

/// Filesystem layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// The live application tree.
    pub live_dir: PathBuf,

    /// Update bookkeeping root. Defaults to `<parent of live_dir>/.update`.
    pub state_dir: Option<PathBuf>,

    /// Local version file. Defaults to `<live_dir>/VERSION`.
    pub version_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            live_dir: PathBuf::from("app"),
            state_dir: None,
            version_file: None,
        }
    }
}

impl PathsConfig {
    pub fn state_dir(&self) -> PathBuf {
        match &self.state_dir {
            Some(dir) => dir.clone(),
            None => {
                let parent = self
                    .live_dir
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                parent.join(".update")
            }
        }
    }

    pub fn version_file(&self) -> PathBuf {
        self.version_file
            .clone()
            .unwrap_or_else(|| self.live_dir.join(uplift_common::VERSION_FILE_NAME))
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_raw_base() -> String {
    "https://raw.githubusercontent.com".to_string()
}

fn default_user_agent() -> String {
    format!("uplift/{}", env!("CARGO_PKG_VERSION"))
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_subdir() -> String {
    "app".to_string()
}

fn default_tag_prefix() -> String {
    "v".to_string()
}

fn default_asset_suffix() -> String {
    ".zip".to_string()
}

fn default_checksums_asset() -> String {
    "SHA256SUMS".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        let cfg = UpdateConfig::parse_toml("").unwrap();
        assert_eq!(cfg, UpdateConfig::default());
        assert_eq!(cfg.required_files, vec!["VERSION"]);
        assert_eq!(cfg.max_consecutive_failures, 2);
        assert_eq!(cfg.verification_window_secs, 60);
        assert_eq!(cfg.restart, RestartConfig::None);
    }

    #[test]
    fn test_parse_release_source() {
        let cfg = UpdateConfig::parse_toml(
            r#"
            [source]
            kind = "release"
            repo = "acme/frame"
            timeout_secs = 5

            [restart]
            kind = "systemctl"
            service = "frame"
            "#,
        )
        .unwrap();

        match &cfg.source.strategy {
            SourceStrategy::Release {
                repo,
                tag_prefix,
                checksums_asset,
                ..
            } => {
                assert_eq!(repo, "acme/frame");
                assert_eq!(tag_prefix, "v");
                assert_eq!(checksums_asset, "SHA256SUMS");
            }
            other => panic!("unexpected strategy {:?}", other),
        }
        assert_eq!(cfg.source.timeout_secs, 5);
        assert_eq!(
            cfg.restart,
            RestartConfig::Systemctl {
                service: "frame".into(),
                use_sudo: true
            }
        );
    }

    #[test]
    fn test_parse_directory_source() {
        let cfg = UpdateConfig::parse_toml(
            r#"
            [source]
            kind = "directory"
            path = "/srv/mirror"
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.source.strategy,
            SourceStrategy::Directory {
                path: PathBuf::from("/srv/mirror")
            }
        );
        assert_eq!(cfg.source.strategy.name(), "directory");
    }

    #[test]
    fn test_unknown_kind_is_parse_error() {
        let err = UpdateConfig::parse_toml("[source]\nkind = \"ftp\"\n").unwrap_err();
        assert!(matches!(err, ValidationError::ParseError(_)));
    }

    #[test]
    fn test_path_defaults() {
        let paths = PathsConfig {
            live_dir: PathBuf::from("/opt/frame/app"),
            state_dir: None,
            version_file: None,
        };
        assert_eq!(paths.state_dir(), PathBuf::from("/opt/frame/.update"));
        assert_eq!(paths.version_file(), PathBuf::from("/opt/frame/app/VERSION"));

        let bare = PathsConfig::default();
        assert_eq!(bare.state_dir(), PathBuf::from("./.update"));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut cfg = UpdateConfig::default();
        cfg.updateable_dirs = vec!["static".into()];
        cfg.restart = RestartConfig::Command {
            program: "/bin/true".into(),
            args: vec!["x".into()],
        };
        let text = cfg.to_toml().unwrap();
        assert_eq!(UpdateConfig::parse_toml(&text).unwrap(), cfg);
    }
}
