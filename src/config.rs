//! Configuration - Client Settings, Job Options, Foreign Manifest

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Client settings incomplete: expected at least 4 lines, found {0}")]
    Incomplete(usize),

    #[error("Invalid job options: {0}")]
    Options(#[from] serde_json::Error),
}

const INSTALL_FAILURE_MARKER: &str = "at2_reb_errorinstallplugs.txt";
const MANAGER_RUNNING_MARKER: &str = "shadows.txt";
const FOREIGN_MANIFEST_FILE: &str = "ftpcontents.txt";

/// Settings written by the farm manager when the user logs in.
///
/// Line-oriented: user, exchange folder, manager executable, plugin version,
/// optional CPU data. Reading stops at the first empty line.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientSettings {
    pub user_name: String,
    pub default_path: PathBuf,
    pub manager_path: PathBuf,
    pub plugin_version: String,
    #[serde(default)]
    pub cpu_data: Option<String>,
}

impl ClientSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let lines: Vec<&str> = content
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .take_while(|l| !l.is_empty())
            .collect();

        if lines.len() < 4 {
            return Err(ConfigError::Incomplete(lines.len()));
        }

        Ok(Self {
            user_name: lines[0].to_string(),
            default_path: PathBuf::from(lines[1]),
            manager_path: PathBuf::from(lines[2]),
            plugin_version: lines[3].to_string(),
            cpu_data: lines.get(4).map(|s| s.to_string()),
        })
    }

    /// Per-user folder receiving the project copy and job descriptor.
    pub fn export_folder(&self) -> PathBuf {
        self.default_path.join(&self.user_name)
    }

    /// Staging folder the manager copies textures and caches into.
    pub fn staging_folder(&self) -> PathBuf {
        self.export_folder().join("tex")
    }

    pub fn install_failure_marker(&self) -> PathBuf {
        self.default_path.join(INSTALL_FAILURE_MARKER)
    }

    pub fn manager_running_marker(&self) -> PathBuf {
        self.default_path.join(MANAGER_RUNNING_MARKER)
    }

    pub fn foreign_manifest_path(&self) -> PathBuf {
        self.default_path.join(FOREIGN_MANIFEST_FILE)
    }
}

fn default_priority() -> String { "1".to_string() }

/// Submission flags chosen by the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobOptions {
    pub distributed: bool,
    pub distributed_confirmed: bool,
    pub auto_start: bool,
    #[serde(default = "default_priority")]
    pub priority: String,
    pub send_email: bool,
    pub notify_on_start: bool,
    pub notify_on_finish: bool,
    pub cost_estimation: bool,
    pub batch_render: bool,
    pub launch_manager: bool,
    /// Stand-in image used when replacing missing textures.
    pub placeholder_image: Option<PathBuf>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            distributed: false,
            distributed_confirmed: false,
            auto_start: false,
            priority: default_priority(),
            send_email: false,
            notify_on_start: false,
            notify_on_finish: false,
            cost_estimation: false,
            batch_render: false,
            launch_manager: false,
            placeholder_image: None,
        }
    }
}

impl JobOptions {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Files already uploaded by other projects, as `filename:size` lines.
#[derive(Debug, Clone, Default)]
pub struct ForeignManifest {
    sizes: HashMap<String, u64>,
}

impl ForeignManifest {
    /// A missing manifest is an empty one.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(content: &str) -> Self {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let sizes = content
            .lines()
            .filter_map(|line| {
                let (name, size) = line.trim().split_once(':')?;
                let size = size.trim().parse::<u64>().ok()?;
                Some((name.to_lowercase(), size))
            })
            .collect();
        Self { sizes }
    }

    /// Size recorded for `filename`, compared case-insensitively.
    pub fn size_of(&self, filename: &str) -> Option<u64> {
        self.sizes.get(&filename.to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_settings() {
        let content = "\u{feff}alice\r\n/farm/exchange\r\n/opt/farm/manager\r\n2.4.1\r\n\r\nignored\r\n";
        let settings = ClientSettings::parse(content).unwrap();
        assert_eq!(settings.user_name, "alice");
        assert_eq!(settings.default_path, PathBuf::from("/farm/exchange"));
        assert_eq!(settings.plugin_version, "2.4.1");
        assert_eq!(settings.cpu_data, None);
        assert_eq!(settings.staging_folder(), PathBuf::from("/farm/exchange/alice/tex"));
    }

    #[test]
    fn test_incomplete_client_settings() {
        let err = ClientSettings::parse("alice\n/farm\n").unwrap_err();
        assert!(matches!(err, ConfigError::Incomplete(2)));
    }

    #[test]
    fn test_job_options_defaults() {
        let options: JobOptions = serde_json::from_str(r#"{"distributed": true}"#).unwrap();
        assert!(options.distributed);
        assert_eq!(options.priority, "1");
        assert!(!options.auto_start);
    }

    #[test]
    fn test_foreign_manifest() {
        let manifest = ForeignManifest::parse("Wood.PNG:1024\nbroken line\nmetal.jpg: 2048\n");
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.size_of("wood.png"), Some(1024));
        assert_eq!(manifest.size_of("METAL.jpg"), Some(2048));
        assert_eq!(manifest.size_of("missing.png"), None);
    }
}
