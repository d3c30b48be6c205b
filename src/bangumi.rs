use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

const BASE_URL: &str = "https://api.bgm.tv";
const TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LIMIT: usize = 10;
/// Bangumi subject type for anime.
const SUBJECT_TYPE_ANIME: &str = "2";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Candidate {
    pub id: i64,
    pub name: String,
    pub name_cn: Option<String>,
    #[serde(rename = "type")]
    pub subject_type: Option<i32>,
    pub date: Option<String>,
}

impl Candidate {
    pub fn display_name(&self) -> &str {
        localized(&self.name, self.name_cn.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SeriesDetail {
    pub id: i64,
    pub name: String,
    pub name_cn: Option<String>,
    pub cover_url: Option<String>,
    pub episodes: Option<i32>,
    pub year: Option<i32>,
}

impl SeriesDetail {
    /// Localized name when there is one, otherwise the original name.
    pub fn display_title(&self) -> &str {
        localized(&self.name, self.name_cn.as_deref())
    }
}

fn localized<'a>(name: &'a str, name_cn: Option<&'a str>) -> &'a str {
    match name_cn.map(str::trim) {
        Some(cn) if !cn.is_empty() => cn,
        _ => name,
    }
}

pub trait SeriesSearch: Send + Sync {
    fn search<'a>(&'a self, query: &'a str, limit: Option<usize>)
    -> BoxFuture<'a, Result<Vec<Candidate>>>;

    fn detail(&self, id: i64) -> BoxFuture<'_, Result<SeriesDetail>>;
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_candidate(item: &Value) -> Option<Candidate> {
    let id = item.get("id").and_then(Value::as_i64).unwrap_or(0);
    let name = str_field(item, "name").unwrap_or_default();
    if id == 0 || name.is_empty() {
        return None;
    }
    Some(Candidate {
        id,
        name,
        name_cn: str_field(item, "name_cn"),
        subject_type: item.get("type").and_then(Value::as_i64).map(|n| n as i32),
        date: str_field(item, "date").or_else(|| str_field(item, "air_date")),
    })
}

/// Search responses come either as `{"list": [...]}` or as a bare array.
pub fn parse_candidates(value: &Value) -> Vec<Candidate> {
    let items = value
        .get("list")
        .and_then(Value::as_array)
        .or_else(|| value.as_array());
    items
        .map(|items| items.iter().filter_map(parse_candidate).collect())
        .unwrap_or_default()
}

pub fn parse_detail(value: &Value, id: i64) -> SeriesDetail {
    let cover_url = value
        .get("images")
        .and_then(|images| images.get("large").or_else(|| images.get("common")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| str_field(value, "cover"));

    let episodes = value
        .get("eps")
        .and_then(Value::as_i64)
        .or_else(|| value.get("total_episodes").and_then(Value::as_i64))
        .or_else(|| {
            value
                .get("episodes")
                .and_then(Value::as_array)
                .map(|eps| eps.len() as i64)
        })
        .map(|n| n as i32);

    let year = value
        .get("date")
        .or_else(|| value.get("air_date"))
        .and_then(Value::as_str)
        .and_then(|date| date.get(0..4))
        .and_then(|y| y.parse().ok());

    SeriesDetail {
        id: value.get("id").and_then(Value::as_i64).unwrap_or(id),
        name: str_field(value, "name").unwrap_or_default(),
        name_cn: str_field(value, "name_cn"),
        cover_url,
        episodes,
        year,
    }
}

pub struct BangumiClient {
    client: reqwest::Client,
    base_url: String,
}

impl BangumiClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .user_agent(concat!("subpair/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Search(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: reqwest::Url, query: &[(&str, String)]) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Search(format!("request to Bangumi failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::Search(format!(
                "Bangumi returned status {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Search(format!("invalid Bangumi response: {}", e)))
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| Error::Search(format!("invalid base URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Search(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn search_subjects(&self, query: &str, limit: Option<usize>) -> Result<Vec<Candidate>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.url(&["search", "subject", query])?;
        let params = [
            ("type", SUBJECT_TYPE_ANIME.to_string()),
            ("responseGroup", "small".to_string()),
            ("max_results", limit.unwrap_or(DEFAULT_LIMIT).to_string()),
        ];
        let value = self.get_json(url, &params).await?;
        let candidates = parse_candidates(&value);
        tracing::info!("Bangumi returned {} candidates for {:?}", candidates.len(), query);
        Ok(candidates)
    }

    pub async fn subject_detail(&self, id: i64) -> Result<SeriesDetail> {
        let url = self.url(&["subject", &id.to_string()])?;
        let value = self.get_json(url, &[]).await?;
        Ok(parse_detail(&value, id))
    }
}

impl SeriesSearch for BangumiClient {
    fn search<'a>(
        &'a self,
        query: &'a str,
        limit: Option<usize>,
    ) -> BoxFuture<'a, Result<Vec<Candidate>>> {
        self.search_subjects(query, limit).boxed()
    }

    fn detail(&self, id: i64) -> BoxFuture<'_, Result<SeriesDetail>> {
        self.subject_detail(id).boxed()
    }
}
