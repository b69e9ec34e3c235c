// MediaWiki page lookups backing the evidence fetcher.
use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

/// A page resolved from a lookup term.
#[derive(Debug, Clone, PartialEq)]
pub struct PageIntro {
    pub title: String,
    pub intro: String,
}

#[async_trait]
pub trait PageSource: Send + Sync {
    /// First existing page among `candidates` (in order) with its intro text.
    async fn intro(&self, lang: &str, candidates: &[String]) -> Result<Option<PageIntro>>;
    /// Full plain-text extract of `title`.
    async fn full_text(&self, lang: &str, title: &str) -> Result<Option<String>>;
    /// Title of the best full-text search hit for `text`.
    async fn search(&self, lang: &str, text: &str) -> Result<Option<String>>;
}

#[derive(Debug, Default, Deserialize)]
struct QueryResp {
    #[serde(default)]
    query: Query,
}

#[derive(Debug, Default, Deserialize)]
struct Query {
    #[serde(default)]
    normalized: Vec<TitleMap>,
    #[serde(default)]
    redirects: Vec<TitleMap>,
    #[serde(default)]
    pages: Vec<WikiPage>,
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct TitleMap { from: String, to: String }

#[derive(Debug, Deserialize)]
struct WikiPage {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    extract: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchHit { title: String }

impl Query {
    /// Follow normalisation and redirects from a requested title to an existing
    /// page with a non-empty extract.
    fn resolve(&self, requested: &str) -> Option<&WikiPage> {
        let mut title = requested;
        if let Some(m) = self.normalized.iter().find(|m| m.from == title) {
            title = &m.to;
        }
        if let Some(m) = self.redirects.iter().find(|m| m.from == title) {
            title = &m.to;
        }
        self.pages.iter().find(|p| {
            p.title == title && !p.missing && !p.invalid && p.extract.as_deref().is_some_and(|e| !e.trim().is_empty())
        })
    }
}

/// Drop section headings (`== History ==`) from a plain-text extract.
pub fn clean_extract(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !(l.starts_with('=') && l.ends_with('=')))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct WikiClient {
    http: Client,
    api_url: String,   // may contain `{lang}`
    limiter: DefaultDirectRateLimiter,
}

impl WikiClient {
    pub fn new(api_url: String, qps: u32, timeout_ms: u64) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("factverify/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        let qps = NonZeroU32::new(qps).context("wiki rate limit must be at least 1 request per second")?;
        let limiter = RateLimiter::direct(Quota::per_second(qps));
        Ok(Self { http, api_url, limiter })
    }

    fn endpoint(&self, lang: &str) -> String {
        self.api_url.replace("{lang}", lang)
    }

    async fn query(&self, lang: &str, params: &[(&str, &str)]) -> Result<Query> {
        self.limiter.until_ready().await;
        let resp = self.http
            .get(self.endpoint(lang))
            .query(&[("action", "query"), ("format", "json"), ("formatversion", "2")])
            .query(params)
            .send().await?
            .error_for_status()?
            .json::<QueryResp>().await?;
        Ok(resp.query)
    }
}

#[async_trait]
impl PageSource for WikiClient {
    async fn intro(&self, lang: &str, candidates: &[String]) -> Result<Option<PageIntro>> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let titles = candidates.join("|");
        let q = self
            .query(lang, &[
                ("prop", "extracts"),
                ("explaintext", "1"),
                ("exintro", "1"),
                ("exlimit", "max"),
                ("redirects", "1"),
                ("titles", titles.as_str()),
            ])
            .await?;
        let found = candidates.iter().find_map(|c| q.resolve(c)).map(|p| PageIntro {
            title: p.title.clone(),
            intro: clean_extract(p.extract.as_deref().unwrap_or_default()),
        });
        debug!(lang, candidates = candidates.len(), found = ?found.as_ref().map(|p| &p.title), "wiki intro lookup");
        Ok(found)
    }

    async fn full_text(&self, lang: &str, title: &str) -> Result<Option<String>> {
        let q = self
            .query(lang, &[("prop", "extracts"), ("explaintext", "1"), ("redirects", "1"), ("titles", title)])
            .await?;
        Ok(q.resolve(title).and_then(|p| p.extract.as_deref()).map(clean_extract))
    }

    async fn search(&self, lang: &str, text: &str) -> Result<Option<String>> {
        let q = self
            .query(lang, &[("list", "search"), ("srsearch", text), ("srlimit", "1"), ("srprop", "")])
            .await?;
        Ok(q.search.into_iter().next().map(|h| h.title))
    }
}
