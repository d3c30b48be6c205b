use std::{collections::BTreeMap, time::Duration};

use sanitize_filename::sanitize;
use serde::{Deserialize, Serialize};

use crate::{
    bangumi::SeriesDetail,
    error::Result,
    llm::{AnimeInfo, Classifier},
    video::{FileInfo, extension},
};

/// Recognition state of one file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RecognitionResult {
    pub file: FileInfo,
    pub info: Option<AnimeInfo>,
    pub loading: bool,
    pub error: Option<String>,
}

/// Results keyed by file path. Every update replaces the whole entry.
#[derive(Debug, Clone, Default)]
pub struct RecognitionStore {
    results: BTreeMap<String, RecognitionResult>,
}

impl RecognitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&RecognitionResult> {
        self.results.get(path)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecognitionResult> {
        self.results.values()
    }

    fn replace(&mut self, result: RecognitionResult) -> RecognitionResult {
        self.results.insert(result.file.path.clone(), result.clone());
        result
    }

    /// Mark `file` as in flight, keeping whatever info it already had.
    pub fn begin(&mut self, file: &FileInfo) -> RecognitionResult {
        let info = self.get(&file.path).and_then(|r| r.info.clone());
        self.replace(RecognitionResult {
            file: file.clone(),
            info,
            loading: true,
            error: None,
        })
    }

    pub fn finish(&mut self, file: &FileInfo, outcome: Result<AnimeInfo>) -> RecognitionResult {
        let result = match outcome {
            Ok(info) => RecognitionResult {
                file: file.clone(),
                info: Some(info),
                loading: false,
                error: None,
            },
            Err(err) => RecognitionResult {
                file: file.clone(),
                info: None,
                loading: false,
                error: Some(err.to_string()),
            },
        };
        self.replace(result)
    }
}

/// Replace the title, and the year when the detail has one. Everything else is
/// kept as classified.
pub fn overlay(info: AnimeInfo, detail: &SeriesDetail) -> AnimeInfo {
    AnimeInfo {
        title: detail.display_title().to_string(),
        year: detail.year.or(info.year),
        ..info
    }
}

/// Classify every video in `files` in turn and stamp `detail` onto each
/// result. A failure is recorded on that file only.
pub async fn apply<C: Classifier + ?Sized>(
    detail: &SeriesDetail,
    files: &[FileInfo],
    classifier: &C,
    store: &mut RecognitionStore,
    delay: Duration,
) -> Vec<RecognitionResult> {
    let mut results = Vec::new();

    for (i, file) in files.iter().filter(|f| f.is_video).enumerate() {
        if i > 0 {
            tokio::time::sleep(delay).await;
        }
        store.begin(file);
        let outcome = classifier
            .classify(&file.name)
            .await
            .map(|info| overlay(info, detail));
        if let Err(err) = &outcome {
            tracing::warn!("Failed to classify {}: {}", file.name, err);
        }
        results.push(store.finish(file, outcome));
    }

    tracing::info!(
        "Applied {} to {} files, {} failed",
        detail.display_title(),
        results.len(),
        results.iter().filter(|r| r.error.is_some()).count()
    );
    results
}

/// Stamp `detail` onto results already in the store without classifying
/// again. Entries without info are left alone.
pub fn overlay_all(store: &mut RecognitionStore, detail: &SeriesDetail) {
    let updated: Vec<RecognitionResult> = store
        .iter()
        .filter_map(|result| {
            let info = result.info.clone()?;
            Some(RecognitionResult {
                file: result.file.clone(),
                info: Some(overlay(info, detail)),
                loading: false,
                error: None,
            })
        })
        .collect();
    for result in updated {
        store.replace(result);
    }
}

/// Suggested file name built from recognised metadata, keeping the file's own
/// extension. `None` until recognition has succeeded.
pub fn rename_preview(result: &RecognitionResult) -> Option<String> {
    let info = result.info.as_ref()?;
    let title = info.title.trim();
    if title.is_empty() {
        return None;
    }
    let mut name = format!("{} S{:02}E{:02}", title, info.season.max(1), info.episode);
    if let Some(special) = info.special_type.as_deref().filter(|s| !s.is_empty()) {
        name.push_str(&format!(" [{}]", special));
    }
    let ext = extension(&result.file.name);
    if !ext.is_empty() {
        name = format!("{}.{}", name, ext);
    }
    Some(sanitize(name))
}
