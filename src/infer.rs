use std::time::Duration;

use crate::{
    error::{Error, Result},
    llm::{Classifier, TitleGuess},
    video::FileInfo,
};

/// Pause between consecutive classifier calls.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InferMode {
    /// One classifier call per sampled file, majority vote over titles.
    #[default]
    PerFile,
    /// A single call over the whole sample.
    Batch,
}

impl InferMode {
    pub fn sample_size(&self) -> usize {
        match self {
            InferMode::PerFile => 5,
            InferMode::Batch => 10,
        }
    }
}

/// Pick up to `n` of the longest names, preferring videos when there are any.
pub fn sample(files: &[FileInfo], n: usize) -> Vec<&FileInfo> {
    let videos: Vec<&FileInfo> = files.iter().filter(|f| f.is_video).collect();
    let mut pool = if videos.is_empty() {
        files.iter().collect()
    } else {
        videos
    };
    pool.sort_by(|a, b| b.name.chars().count().cmp(&a.name.chars().count()));
    pool.truncate(n);
    pool
}

struct Vote {
    title: String,
    count: usize,
    confidence_sum: f32,
}

impl Vote {
    fn mean_confidence(&self) -> f32 {
        self.confidence_sum / self.count as f32
    }
}

/// Majority title, ties broken by mean confidence, then by first appearance.
fn tally(guesses: &[TitleGuess]) -> Option<TitleGuess> {
    let mut votes: Vec<Vote> = Vec::new();
    for guess in guesses {
        let title = guess.title.trim();
        if title.is_empty() {
            continue;
        }
        let key = title.to_lowercase();
        match votes.iter_mut().find(|v| v.title.to_lowercase() == key) {
            Some(vote) => {
                vote.count += 1;
                vote.confidence_sum += guess.confidence;
            }
            None => votes.push(Vote {
                title: title.to_string(),
                count: 1,
                confidence_sum: guess.confidence,
            }),
        }
    }

    let mut best: Option<&Vote> = None;
    for vote in &votes {
        let better = match best {
            None => true,
            Some(current) => {
                vote.count > current.count
                    || (vote.count == current.count
                        && vote.mean_confidence() > current.mean_confidence())
            }
        };
        if better {
            best = Some(vote);
        }
    }

    best.map(|vote| TitleGuess {
        title: vote.title.clone(),
        confidence: vote.mean_confidence(),
    })
}

/// Infer the series title shared by `files`.
pub async fn infer<C: Classifier + ?Sized>(
    files: &[FileInfo],
    classifier: &C,
    mode: InferMode,
    delay: Duration,
) -> Result<TitleGuess> {
    let picked = sample(files, mode.sample_size());
    if picked.is_empty() {
        return Err(Error::InferTitle("no files to sample".to_string()));
    }

    match mode {
        InferMode::Batch => {
            let names: Vec<String> = picked.iter().map(|f| f.name.clone()).collect();
            let guess = classifier
                .classify_batch(&names)
                .await
                .map_err(|e| Error::InferTitle(e.to_string()))?;
            let title = guess.title.trim();
            if title.is_empty() {
                return Err(Error::InferTitle("model returned an empty title".to_string()));
            }
            Ok(TitleGuess {
                title: title.to_string(),
                confidence: guess.confidence,
            })
        }
        InferMode::PerFile => {
            let mut guesses = Vec::with_capacity(picked.len());
            let mut last_error = None;
            for (i, file) in picked.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(delay).await;
                }
                match classifier.classify(&file.name).await {
                    Ok(info) => {
                        tracing::debug!("{} -> {:?}", file.name, info.title);
                        guesses.push(TitleGuess {
                            title: info.title,
                            confidence: info.confidence,
                        });
                    }
                    Err(err) => {
                        tracing::warn!("Failed to classify {}: {}", file.name, err);
                        last_error = Some(err.to_string());
                    }
                }
            }

            tally(&guesses).ok_or_else(|| {
                Error::InferTitle(last_error.unwrap_or_else(|| "no title recognised".to_string()))
            })
        }
    }
}
