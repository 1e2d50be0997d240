//! Asset Manifest - Files To Relocate
//!
//! Keyed by logical (bundle-relative) path; the first producer of a path wins.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Asset {
    /// Destination path inside the bundle, always `/`-separated.
    pub logical_path: String,
    pub source_path: PathBuf,
    pub size_bytes: u64,
    pub modified_time_millis: i64,
}

impl Asset {
    /// Stats `source_path`; fails when the file is unreadable.
    pub fn from_file(logical_path: impl Into<String>, source_path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(source_path)?;
        let modified: chrono::DateTime<chrono::Utc> = metadata.modified()?.into();
        Ok(Self {
            logical_path: logical_path.into(),
            source_path: source_path.to_path_buf(),
            size_bytes: metadata.len(),
            modified_time_millis: modified.timestamp_millis(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssetManifest {
    assets: Vec<Asset>,
    #[serde(skip)]
    logical_paths: HashSet<String>,
}

impl AssetManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `asset` unless its logical path is already present.
    pub fn insert(&mut self, asset: Asset) -> bool {
        if !self.logical_paths.insert(asset.logical_path.clone()) {
            return false;
        }
        log::debug!("staged {} <- {}", asset.logical_path, asset.source_path.display());
        self.assets.push(asset);
        true
    }

    /// Stats and inserts one file. Unreadable files are skipped.
    pub fn stage_file(&mut self, logical_path: String, source_path: &Path) -> bool {
        if self.contains(&logical_path) {
            return false;
        }
        match Asset::from_file(logical_path, source_path) {
            Ok(asset) => self.insert(asset),
            Err(e) => {
                log::debug!("skipping {}: {}", source_path.display(), e);
                false
            }
        }
    }

    pub fn contains(&self, logical_path: &str) -> bool {
        self.logical_paths.contains(logical_path)
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_logical_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(a.join("wood.png"), b"1234").unwrap();
        fs::write(b.join("wood.png"), b"12").unwrap();

        let mut manifest = AssetManifest::new();
        assert!(manifest.stage_file("tex/wood.png".into(), &a.join("wood.png")));
        assert!(!manifest.stage_file("tex/wood.png".into(), &b.join("wood.png")));
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.assets()[0].size_bytes, 4);
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let mut manifest = AssetManifest::new();
        assert!(!manifest.stage_file("tex/nope.png".into(), Path::new("/definitely/not/here.png")));
        assert!(manifest.is_empty());
    }
}
