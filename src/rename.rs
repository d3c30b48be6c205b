use std::{collections::HashMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    episode::file_name,
    error::{Error, Result},
    plan::{RenamePlanEntry, target_name},
    video::FileInfo,
};

/// Request shape of the batched rename call: paired video and subtitle
/// arrays plus the suffix.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RenameRequest {
    pub video_files: Vec<FileInfo>,
    pub subtitle_files: Vec<FileInfo>,
    pub suffix: String,
}

/// `renamed_files[i]` is the new name of `subtitle_files[i]` of the request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RenameResponse {
    pub success: bool,
    pub message: String,
    pub renamed_files: Vec<String>,
}

/// The filesystem primitive: rename `old_path` to `new_name` inside the same
/// directory.
pub trait Renamer {
    fn exists(&self, path: &str) -> bool;

    fn rename(&self, old_path: &str, new_name: &str) -> std::result::Result<(), String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsRenamer;

impl Renamer for FsRenamer {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn rename(&self, old_path: &str, new_name: &str) -> std::result::Result<(), String> {
        let source = Path::new(old_path);
        if !source.exists() {
            return Err(format!("{} does not exist", old_path));
        }
        let new_path = join_parent(old_path, new_name);
        if new_path == old_path {
            return Ok(());
        }
        if Path::new(&new_path).exists() {
            return Err(format!("target {} already exists", new_name));
        }
        fs::rename(source, &new_path).map_err(|e| e.to_string())
    }
}

/// Everything before the last `/` or `\`, or `""` for a bare name.
pub fn parent_dir(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(i) => &path[..i],
        None => "",
    }
}

/// Replace the last component of `path` with `name`, keeping whichever
/// separator the path already uses.
pub fn join_parent(path: &str, name: &str) -> String {
    match path.rfind(['/', '\\']) {
        Some(i) => format!("{}{}", &path[..=i], name),
        None => name.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameReport {
    pub success: bool,
    pub message: String,
    /// New names of the entries renamed so far, in plan order.
    pub renamed_names: Vec<String>,
}

impl RenameReport {
    /// A successful report must account for every planned entry.
    pub fn verify(&self, expected: usize) -> Result<()> {
        if self.success && self.renamed_names.len() != expected {
            return Err(Error::CountMismatch {
                expected,
                actual: self.renamed_names.len(),
            });
        }
        Ok(())
    }
}

fn files(n: usize) -> String {
    if n == 1 {
        "1 file".to_string()
    } else {
        format!("{} files", n)
    }
}

/// Apply `entries` one at a time, in order, stopping at the first failure.
/// Files renamed before a failure stay renamed. Nothing is touched unless
/// every source exists, and entries that already carry their target name
/// count as done.
pub fn execute<R: Renamer + ?Sized>(entries: &[RenamePlanEntry], renamer: &R) -> RenameReport {
    let total = entries.len();

    let missing: Vec<&str> = entries
        .iter()
        .map(|entry| entry.source_path.as_str())
        .filter(|path| !renamer.exists(path))
        .collect();
    if !missing.is_empty() {
        tracing::warn!("Missing subtitle files: {}", missing.join(", "));
        return RenameReport {
            success: false,
            message: format!(
                "Subtitle file not found: {}. Nothing was renamed.",
                missing.join(", ")
            ),
            renamed_names: Vec::new(),
        };
    }

    let mut renamed_names = Vec::with_capacity(total);
    for (i, entry) in entries.iter().enumerate() {
        let name = file_name(&entry.source_path);
        if name == entry.target_name {
            tracing::debug!("{} already named", entry.source_path);
            renamed_names.push(entry.target_name.clone());
            continue;
        }

        tracing::debug!("Rename {} -> {}", entry.source_path, entry.target_name);
        if let Err(err) = renamer.rename(&entry.source_path, &entry.target_name) {
            tracing::warn!("Failed to rename {}: {}", entry.source_path, err);
            return RenameReport {
                success: false,
                message: format!(
                    "Failed to rename {}: {}. {} of {} already renamed and not rolled back; {} not attempted.",
                    name,
                    err,
                    i,
                    files(total),
                    files(total - i - 1)
                ),
                renamed_names,
            };
        }
        renamed_names.push(entry.target_name.clone());
    }

    tracing::info!("Renamed {}", files(renamed_names.len()));
    RenameReport {
        success: true,
        message: format!("Renamed {}", files(renamed_names.len())),
        renamed_names,
    }
}

/// Batched rename over the paired arrays of `request`.
pub fn rename_subtitle_files<R: Renamer + ?Sized>(
    request: &RenameRequest,
    renamer: &R,
) -> RenameResponse {
    if request.video_files.len() != request.subtitle_files.len() {
        return RenameResponse {
            success: false,
            message: format!(
                "Video count ({}) does not match subtitle count ({})",
                request.video_files.len(),
                request.subtitle_files.len()
            ),
            renamed_files: Vec::new(),
        };
    }

    let entries: Vec<RenamePlanEntry> = request
        .video_files
        .iter()
        .zip(&request.subtitle_files)
        .map(|(video, subtitle)| RenamePlanEntry {
            source_path: subtitle.path.clone(),
            target_name: target_name(&video.name, &subtitle.name, &request.suffix),
            video_ref_path: video.path.clone(),
        })
        .collect();

    let report = execute(&entries, renamer);
    RenameResponse {
        success: report.success,
        message: report.message,
        renamed_files: report.renamed_names,
    }
}

/// Reflect executed renames in the in-memory subtitle list. Only the first
/// `renamed_names.len()` entries are applied; everything else passes through.
pub fn apply_renames(
    subtitles: &[FileInfo],
    entries: &[RenamePlanEntry],
    renamed_names: &[String],
) -> Vec<FileInfo> {
    let renamed: HashMap<&str, &str> = entries
        .iter()
        .zip(renamed_names)
        .map(|(entry, name)| (entry.source_path.as_str(), name.as_str()))
        .collect();

    subtitles
        .iter()
        .map(|subtitle| match renamed.get(subtitle.path.as_str()) {
            Some(name) => FileInfo {
                name: name.to_string(),
                path: join_parent(&subtitle.path, name),
                is_video: subtitle.is_video,
            },
            None => subtitle.clone(),
        })
        .collect()
}
