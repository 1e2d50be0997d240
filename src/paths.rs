//! Path helpers shared by discovery, staging and the render settings.
//!
//! Farm-side destinations are Windows paths regardless of the client OS.

use std::fs;
use std::path::{Path, PathBuf};

const ALLOWED_FILENAME_PUNCTUATION: &[char] = &['_', '-', '.', ' '];
const PATH_SEPARATORS: &[char] = &['/', '\\'];

/// Prefix the host uses for paths relative to the project file.
pub const RELATIVE_PREFIX: &str = "//";

/// Resolves a host path. `//`-relative paths are anchored at the directory of
/// `library` when given, otherwise at the project file's directory.
pub fn resolve_host_path(path: &str, project_file: &str, library: Option<&str>) -> PathBuf {
    match path.strip_prefix(RELATIVE_PREFIX) {
        Some(rest) => {
            let anchor = library.filter(|l| !l.is_empty()).unwrap_or(project_file);
            let base = Path::new(anchor).parent().unwrap_or_else(|| Path::new(""));
            base.join(rest)
        }
        None => PathBuf::from(path),
    }
}

/// Letters, digits, underscore, hyphen, period and space only.
pub fn is_valid_filename(filename: &str) -> bool {
    filename
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || ALLOWED_FILENAME_PUNCTUATION.contains(&c))
}

/// Replaces every character outside the allow-list with `_`.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || ALLOWED_FILENAME_PUNCTUATION.contains(&c) {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Name of the exported project copy: sanitised, no spaces, never empty.
pub fn export_project_name(project_file: &str) -> String {
    let name = file_name(project_file);
    let cleaned = sanitize_filename(&name).replace(' ', "_");
    if cleaned.is_empty() {
        "untitled.blend".to_string()
    } else {
        cleaned
    }
}

/// `location/filename+ext`, or the first `filename_N+ext` that does not exist.
pub fn unique_filename(location: &Path, filename: &str, ext: &str) -> PathBuf {
    let first = location.join(format!("{}{}", filename, ext));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|i| location.join(format!("{}_{}{}", filename, i, ext)))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

/// Final path component of a host path, accepting either separator.
pub fn file_name(path: &str) -> String {
    path.rsplit(PATH_SEPARATORS).next().unwrap_or("").to_string()
}

pub fn extension_lower(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Server-side texture folder of a user.
pub fn server_tex_path(user: &str) -> String {
    format!("X:\\{}\\tex", user)
}

/// Server-side render output location for `output_path`'s file name.
pub fn farm_output_path(user: &str, output_path: &str) -> String {
    format!("C:\\logs\\output\\{}\\{}", user, file_name(output_path))
}

/// Local folder the finished frames are downloaded to; empty for temp output.
pub fn local_download_path(output_path: &Path) -> String {
    if output_path.starts_with("/tmp") {
        return String::new();
    }
    output_path
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

/// Physical file of one UDIM tile.
///
/// A `<UDIM>` token is replaced; otherwise the tile number replaces the
/// numeric part after the first dot of the file name.
pub fn udim_tile_path(path: &str, tile: u32) -> String {
    if path.contains("<UDIM>") {
        return path.replace("<UDIM>", &tile.to_string());
    }
    let name = file_name(path);
    let dir = &path[..path.len() - name.len()];
    let stem = name.split('.').next().unwrap_or("");
    let ext = name.rsplit('.').next().unwrap_or("");
    format!("{}{}.{}.{}", dir, stem, tile, ext)
}

/// Sibling frames of an image sequence: every file in the same folder whose
/// name starts with the frame-number-stripped stem and ends with the same
/// extension. Sorted so repeated scans agree.
pub fn sequence_siblings(frame: &Path) -> Vec<PathBuf> {
    let Some(dir) = frame.parent() else {
        return vec![];
    };
    let stem = frame
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_string();
    let ext = frame
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    let Ok(entries) = fs::read_dir(dir) else {
        return vec![];
    };
    let mut frames: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&stem) && name.ends_with(&ext)
        })
        .map(|entry| entry.path())
        .collect();
    frames.sort();
    frames
}
