//! Filename classification through an OpenAI-compatible chat completion
//! endpoint (Ollama, LM Studio and friends).

use std::{sync::LazyLock, time::Duration};

use futures::future::{BoxFuture, FutureExt};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

const TIMEOUT: Duration = Duration::from_secs(300);

const CLASSIFY_PROMPT: &str = r#"You extract anime release information from a single video filename.
Reply with JSON only, no commentary.
- title: the full series title including season wording, without resolution or group tags
- season: season number, 1 when not stated
- episode: episode number, 0 when it cannot be determined
- special_type: "OVA", "SP", "Movie" or similar, null for regular episodes
- resolution: e.g. "1080p"
- codec: e.g. "AVC", "HEVC"
- group: release group, e.g. "VCB-Studio"
- language_tags: subtitle or audio language tags, e.g. ["CHS", "JPN"]
- confidence: number between 0 and 1
{"title":"","season":1,"episode":0,"special_type":null,"resolution":"","codec":"","group":"","language_tags":[],"confidence":0}"#;

const BATCH_PROMPT: &str = r#"You are given several filenames that belong to the same anime series.
Work out the series title from what the names have in common, ignoring episode numbers,
resolution, codec and release group. Prefer Chinese or Japanese titles, otherwise English.
Reply with JSON only: {"title":"","confidence":0}"#;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<(?:seed:)?think>.*?</(?:seed:)?think>").unwrap());

/// Structured metadata recognised from one filename.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnimeInfo {
    pub title: String,
    #[serde(deserialize_with = "loose_number")]
    pub season: u32,
    #[serde(deserialize_with = "loose_number")]
    pub episode: u32,
    pub special_type: Option<String>,
    pub resolution: String,
    pub codec: String,
    pub group: String,
    pub language_tags: Vec<String>,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TitleGuess {
    #[serde(alias = "anime_title")]
    pub title: String,
    #[serde(default)]
    pub confidence: f32,
}

/// Wire shape of a classification result.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LlmResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> From<Result<T>> for LlmResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(err) => Self {
                success: false,
                data: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Models sometimes return numbers as strings ("01").
fn loose_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Number(u32),
        Float(f64),
        Text(String),
        Null(()),
    }

    Ok(match Loose::deserialize(deserializer)? {
        Loose::Number(n) => n,
        Loose::Float(f) if f >= 0.0 => f as u32,
        Loose::Float(_) => 0,
        Loose::Text(s) => s.trim().parse().unwrap_or(0),
        Loose::Null(()) => 0,
    })
}

pub trait Classifier: Send + Sync {
    fn classify<'a>(&'a self, filename: &'a str) -> BoxFuture<'a, Result<AnimeInfo>>;

    fn classify_batch<'a>(&'a self, filenames: &'a [String]) -> BoxFuture<'a, Result<TitleGuess>>;
}

/// Strip reasoning blocks and Markdown fences, then parse the JSON payload.
pub fn parse_content<T: DeserializeOwned>(content: &str) -> Result<T> {
    let cleaned = THINK_BLOCK.replace_all(content, "");
    if let Ok(value) = serde_json::from_str(&cleaned) {
        return Ok(value);
    }

    let unfenced = cleaned
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(unfenced)
        .map_err(|_| Error::Classifier(format!("unexpected model output: {}", content)))
}

pub struct LlmClient {
    client: reqwest::Client,
    model_url: String,
    model_name: String,
}

impl LlmClient {
    pub fn new(model_url: &str, model_name: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .map_err(|e| Error::Classifier(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            model_url: model_url.to_string(),
            model_name: model_name.to_string(),
        })
    }

    async fn complete(&self, system: &str, user: String, temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model_name,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "temperature": temperature,
        });

        let response = self
            .client
            .post(&self.model_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Classifier(format!("request to model failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Classifier(format!(
                "model returned status {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Classifier(format!("invalid model response: {}", e)))?;

        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| Error::Classifier("model response has no content".to_string()))?;
        tracing::debug!("Model replied: {}", content);
        Ok(content.to_string())
    }

    pub async fn analyze_filename(&self, filename: &str) -> Result<AnimeInfo> {
        let content = self
            .complete(
                CLASSIFY_PROMPT,
                format!("Filename: {}", filename),
                0.1,
            )
            .await?;
        parse_content(&content)
    }

    pub async fn batch_analyze_filenames(&self, filenames: &[String]) -> Result<TitleGuess> {
        if filenames.is_empty() {
            return Err(Error::Classifier("no filenames given".to_string()));
        }
        let content = self
            .complete(
                BATCH_PROMPT,
                format!("Filenames:\n{}", filenames.join("\n")),
                0.3,
            )
            .await?;
        parse_content(&content)
    }
}

impl Classifier for LlmClient {
    fn classify<'a>(&'a self, filename: &'a str) -> BoxFuture<'a, Result<AnimeInfo>> {
        self.analyze_filename(filename).boxed()
    }

    fn classify_batch<'a>(&'a self, filenames: &'a [String]) -> BoxFuture<'a, Result<TitleGuess>> {
        self.batch_analyze_filenames(filenames).boxed()
    }
}
