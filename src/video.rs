use anyhow::{Context, Result};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashSet},
    path::Path,
};
use walkdir::WalkDir;

use crate::episode::{Matcher, file_name};

pub const VIDEO_EXTENSIONS: [&str; 10] = [
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "rmvb", "3gp",
];

pub const SUBTITLE_EXTENSIONS: [&str; 10] = [
    "srt", "ass", "ssa", "sub", "idx", "vtt", "txt", "smi", "sbv", "dfxp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Video,
    Subtitle,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Video => "VIDEO",
            FileKind::Subtitle => "SUB",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub is_video: bool,
}

impl FileInfo {
    pub fn kind(&self) -> FileKind {
        if self.is_video {
            FileKind::Video
        } else {
            FileKind::Subtitle
        }
    }
}

/// Lowercased extension after the last dot, empty when there is none.
pub fn extension(name: &str) -> String {
    match name.rfind('.') {
        Some(i) => name[i + 1..].to_lowercase(),
        None => String::new(),
    }
}

pub fn parse_kind(name: &str) -> Option<FileKind> {
    let ext = extension(name);
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(FileKind::Video)
    } else if SUBTITLE_EXTENSIONS.contains(&ext.as_str()) {
        Some(FileKind::Subtitle)
    } else {
        None
    }
}

/// Turn raw paths into [`FileInfo`]s, silently dropping anything that is
/// neither a video nor a subtitle.
pub fn classify<S: AsRef<str>>(paths: &[S]) -> Vec<FileInfo> {
    paths
        .iter()
        .filter_map(|path| {
            let path = path.as_ref();
            let name = file_name(path);
            let kind = parse_kind(name)?;
            Some(FileInfo {
                name: name.to_string(),
                path: path.to_string(),
                is_video: kind == FileKind::Video,
            })
        })
        .collect()
}

pub fn partition(files: Vec<FileInfo>) -> (Vec<FileInfo>, Vec<FileInfo>) {
    files.into_iter().partition(|file| file.is_video)
}

/// Combine two lists, keeping the incoming entry when a path appears in both,
/// and sort the result by name.
pub fn merge(existing: &[FileInfo], incoming: &[FileInfo]) -> Vec<FileInfo> {
    let mut by_path: BTreeMap<&str, &FileInfo> = BTreeMap::new();
    for file in existing.iter().chain(incoming) {
        by_path.insert(file.path.as_str(), file);
    }
    let mut merged: Vec<FileInfo> = by_path.into_values().cloned().collect();
    merged.sort_by(|a, b| natural_cmp(&a.name, &b.name));
    merged
}

/// Case-insensitive ordering that compares digit runs by value, so `ep2`
/// comes before `ep10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => break,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_run = take_digits(&mut left);
                let r_run = take_digits(&mut right);
                let l_trimmed = l_run.trim_start_matches('0');
                let r_trimmed = r_run.trim_start_matches('0');
                let ord = l_trimmed
                    .len()
                    .cmp(&r_trimmed.len())
                    .then_with(|| l_trimmed.cmp(r_trimmed));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(l), Some(r)) => {
                let ord = l.to_lowercase().cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }

    // equal under the relaxed rules; fall back to a strict comparison
    a.cmp(b)
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        chars.next();
    }
    run
}

/// Filter a directory listing so subtitles only come along when a video in the
/// same listing has the same episode key.
pub fn import_directory(files: Vec<FileInfo>, matcher: &Matcher) -> Vec<FileInfo> {
    let video_keys: HashSet<String> = files
        .iter()
        .filter(|file| file.is_video)
        .filter_map(|file| matcher.extract(&file.name))
        .collect();

    files
        .into_iter()
        .filter(|file| {
            if file.is_video {
                return true;
            }
            let keep = matcher
                .extract(&file.name)
                .is_some_and(|key| video_keys.contains(&key));
            if !keep {
                tracing::debug!("Skip orphan subtitle {}", file.name);
            }
            keep
        })
        .collect()
}

/// List the videos and subtitles directly inside `dir`.
pub fn list_directory(dir: &Path) -> Result<Vec<FileInfo>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to read {:?}", dir))?;
        if !entry.file_type().is_file() {
            continue;
        }
        paths.push(entry.path().to_string_lossy().to_string());
    }
    Ok(classify(&paths))
}
