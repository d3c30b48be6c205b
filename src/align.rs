use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap},
};

use crate::{
    episode::{EpisodeKey, Matcher},
    video::FileInfo,
};

/// One episode's pairing state. At least one side is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRow {
    pub episode: EpisodeKey,
    pub video: Option<FileInfo>,
    pub subtitle: Option<FileInfo>,
}

impl AlignmentRow {
    pub fn is_paired(&self) -> bool {
        self.video.is_some() && self.subtitle.is_some()
    }
}

/// Order keys by numeric value. Keys that are not plain integers go last,
/// and equal values (`1` vs `01`) fall back to string order.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn index_by_key<'a>(
    files: &'a [FileInfo],
    matcher: &Matcher,
    side: &str,
) -> HashMap<EpisodeKey, &'a FileInfo> {
    let mut map: HashMap<EpisodeKey, &FileInfo> = HashMap::new();
    for file in files {
        let Some(key) = matcher.extract(&file.name) else {
            tracing::debug!("No episode key in {} {}", side, file.name);
            continue;
        };
        if let Some(first) = map.get(&key) {
            tracing::debug!(
                "Duplicate {} for episode {}: keeping {}, ignoring {}",
                side,
                key,
                first.name,
                file.name
            );
            continue;
        }
        map.insert(key, file);
    }
    map
}

/// Build one row per distinct episode key found on either side.
pub fn align(videos: &[FileInfo], subtitles: &[FileInfo], matcher: &Matcher) -> Vec<AlignmentRow> {
    let video_map = index_by_key(videos, matcher, "video");
    let subtitle_map = index_by_key(subtitles, matcher, "subtitle");

    let mut keys: Vec<&EpisodeKey> = video_map
        .keys()
        .chain(subtitle_map.keys())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    keys.sort_by(|a, b| compare_keys(a, b));

    keys.into_iter()
        .map(|key| AlignmentRow {
            episode: key.clone(),
            video: video_map.get(key).map(|f| (*f).clone()),
            subtitle: subtitle_map.get(key).map(|f| (*f).clone()),
        })
        .collect()
}

/// Episodes that have a video but no subtitle.
pub fn missing(rows: &[AlignmentRow]) -> Vec<EpisodeKey> {
    rows.iter()
        .filter(|row| row.video.is_some() && row.subtitle.is_none())
        .map(|row| row.episode.clone())
        .collect()
}

/// Episodes that have a subtitle but no video.
pub fn orphans(rows: &[AlignmentRow]) -> Vec<EpisodeKey> {
    rows.iter()
        .filter(|row| row.video.is_none() && row.subtitle.is_some())
        .map(|row| row.episode.clone())
        .collect()
}

pub fn pairs(rows: &[AlignmentRow]) -> impl Iterator<Item = (&FileInfo, &FileInfo)> {
    rows.iter()
        .filter_map(|row| Some((row.video.as_ref()?, row.subtitle.as_ref()?)))
}
