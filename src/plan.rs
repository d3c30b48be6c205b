use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    align::AlignmentRow,
    episode::EpisodeKey,
    error::{Error, Result},
    rename::{RenameRequest, parent_dir},
    video::{FileInfo, extension},
};

/// Language tags offered for quick selection.
pub const SUFFIX_PRESETS: [&str; 2] = ["chs", "cht"];

/// One subtitle rename, not yet applied.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RenamePlanEntry {
    pub source_path: String,
    pub target_name: String,
    pub video_ref_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenamePlan {
    pub entries: Vec<RenamePlanEntry>,
    /// Episodes with a video but no subtitle.
    pub skipped: Vec<EpisodeKey>,
    pub(crate) videos: Vec<FileInfo>,
    pub(crate) subtitles: Vec<FileInfo>,
}

impl RenamePlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The batched request shape consumed by
    /// [`rename_subtitle_files`](crate::rename::rename_subtitle_files).
    pub fn to_request(&self, suffix: &str) -> RenameRequest {
        RenameRequest {
            video_files: self.videos.clone(),
            subtitle_files: self.subtitles.clone(),
            suffix: suffix.to_string(),
        }
    }
}

/// A non-empty custom suffix wins over the preset.
pub fn resolve_suffix(custom: &str, preset: &str) -> String {
    let custom = custom.trim();
    if custom.is_empty() {
        preset.trim().to_string()
    } else {
        custom.to_string()
    }
}

/// `name` without its final extension. Names without a dot, or whose only dot
/// is the leading one, are returned whole.
pub fn stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    }
}

pub fn target_name(video_name: &str, subtitle_name: &str, suffix: &str) -> String {
    let stem = stem(video_name);
    let ext = extension(subtitle_name);
    if suffix.is_empty() {
        format!("{}.{}", stem, ext)
    } else {
        format!("{}.{}.{}", stem, suffix, ext)
    }
}

/// Preview of the new subtitle name for each fully paired row.
pub fn preview(rows: &[AlignmentRow], suffix: &str) -> Vec<(EpisodeKey, String)> {
    rows.iter()
        .filter_map(|row| {
            let video = row.video.as_ref()?;
            let subtitle = row.subtitle.as_ref()?;
            Some((
                row.episode.clone(),
                target_name(&video.name, &subtitle.name, suffix),
            ))
        })
        .collect()
}

/// Plan the subtitle renames for every paired row, in row order.
pub fn plan(rows: &[AlignmentRow], suffix: &str) -> Result<RenamePlan> {
    let mut result = RenamePlan::default();
    let mut claimed: HashMap<(String, String), String> = HashMap::new();

    for row in rows {
        let (video, subtitle) = match (&row.video, &row.subtitle) {
            (Some(video), Some(subtitle)) => (video, subtitle),
            (Some(_), None) => {
                result.skipped.push(row.episode.clone());
                continue;
            }
            _ => continue,
        };

        result.videos.push(video.clone());
        result.subtitles.push(subtitle.clone());

        let target = target_name(&video.name, &subtitle.name, suffix);
        let slot = (parent_dir(&subtitle.path).to_string(), target.clone());
        if let Some(first) = claimed.get(&slot) {
            return Err(Error::Collision {
                target,
                first: first.clone(),
                second: subtitle.path.clone(),
            });
        }
        claimed.insert(slot, subtitle.path.clone());

        result.entries.push(RenamePlanEntry {
            source_path: subtitle.path.clone(),
            target_name: target,
            video_ref_path: video.path.clone(),
        });
    }

    let paired = rows.iter().filter(|row| row.is_paired()).count();
    if result.entries.len() != paired {
        return Err(Error::CountMismatch {
            expected: paired,
            actual: result.entries.len(),
        });
    }

    if !result.skipped.is_empty() {
        tracing::info!(
            "Skipping episodes without subtitles: {}",
            result.skipped.join(", ")
        );
    }

    Ok(result)
}
