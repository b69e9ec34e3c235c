use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::VerifyError;
use crate::segments::{case_variants, split_lines, SplitLevel};
use crate::types::{EvidenceAtom, EvidencePage};
use crate::wiki::PageSource;

/// Lookup for one entry: the word as given and its translation into the
/// knowledge-base language. Both must be non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub word: String,
    pub translated_word: String,
}

impl FetchRequest {
    pub fn new(word: impl Into<String>, translated_word: impl Into<String>) -> Self {
        Self { word: word.into(), translated_word: translated_word.into() }
    }
}

#[async_trait]
pub trait EvidenceFetcher: Send + Sync {
    /// Resolved evidence word and pages per entry, in input order. An entry with
    /// nothing found gets an empty page list.
    async fn fetch_evidences_batch(
        &self,
        entries: &[FetchRequest],
        only_intro: bool,
        word_lang: &str,
    ) -> Result<(Vec<String>, Vec<Vec<EvidencePage>>)>;

    async fn fetch_evidences(&self, entry: &FetchRequest, only_intro: bool, word_lang: &str) -> Result<(String, Vec<EvidencePage>)> {
        let (mut words, mut evids) = self
            .fetch_evidences_batch(std::slice::from_ref(entry), only_intro, word_lang)
            .await?;
        match (words.pop(), evids.pop()) {
            (Some(word), Some(pages)) => Ok((word, pages)),
            _ => anyhow::bail!("evidence fetcher returned no entry"),
        }
    }

    /// Last intro line index per page title seen so far.
    fn max_intro_sent_idx(&self) -> HashMap<String, usize>;

    /// Last intro line index of one page, if known.
    fn intro_boundary(&self, title: &str) -> Option<usize> {
        self.max_intro_sent_idx().get(title).copied()
    }
}

/// Reject entries with an empty word or translated word.
pub fn validate_requests(entries: &[FetchRequest]) -> Result<(), VerifyError> {
    for entry in entries {
        if entry.word.trim().is_empty() || entry.translated_word.trim().is_empty() {
            return Err(VerifyError::InvalidFetchRequest(format!(
                "'word' and 'translated_word' must be non-empty, got {entry:?}"
            )));
        }
    }
    Ok(())
}

/// Flag evidence lines that fall inside their page's introduction. Titles
/// without a known boundary are never intro.
pub fn mark_intro<F>(atoms: &mut [EvidenceAtom], boundary: F)
where
    F: Fn(&str) -> Option<usize>,
{
    for atom in atoms {
        atom.in_intro = boundary(&atom.title).is_some_and(|max| atom.line_idx <= max);
    }
}

/// Titles kept in the intro-boundary cache by default.
pub const INTRO_CACHE_TITLES: usize = 10_000;

/// Intro boundaries per title, evicting the oldest title past `capacity`.
#[derive(Debug)]
struct IntroBounds {
    bounds: HashMap<String, usize>,
    order: VecDeque<String>,
    capacity: usize,
}

impl IntroBounds {
    fn new(capacity: usize) -> Self {
        Self { bounds: HashMap::new(), order: VecDeque::new(), capacity: capacity.max(1) }
    }

    fn insert(&mut self, title: String, last: usize) {
        if self.bounds.insert(title.clone(), last).is_some() {
            return;
        }
        self.order.push_back(title);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.bounds.remove(&oldest);
            }
        }
    }
}

pub struct WikipediaEvidenceFetcher {
    source: Arc<dyn PageSource>,
    kb_lang: String,
    split_level: SplitLevel,
    concurrency: usize,
    intro_bounds: RwLock<IntroBounds>,
}

impl WikipediaEvidenceFetcher {
    pub fn new(source: Arc<dyn PageSource>, kb_lang: impl Into<String>, split_level: SplitLevel, concurrency: usize) -> Self {
        Self {
            source,
            kb_lang: kb_lang.into(),
            split_level,
            concurrency: concurrency.max(1),
            intro_bounds: RwLock::new(IntroBounds::new(INTRO_CACHE_TITLES)),
        }
    }

    /// Keep intro boundaries for at most `titles` pages.
    pub fn with_intro_capacity(self, titles: usize) -> Self {
        Self { intro_bounds: RwLock::new(IntroBounds::new(titles)), ..self }
    }

    /// Lookup terms in the knowledge-base language come first.
    fn candidates(&self, entry: &FetchRequest, word_lang: &str) -> Vec<String> {
        let (first, second) = if word_lang == self.kb_lang {
            (&entry.word, &entry.translated_word)
        } else {
            (&entry.translated_word, &entry.word)
        };
        let mut out = case_variants(first);
        for v in case_variants(second) {
            if !out.contains(&v) {
                out.push(v);
            }
        }
        out
    }

    async fn fetch_one(&self, entry: &FetchRequest, only_intro: bool, word_lang: &str) -> Result<(String, Vec<EvidencePage>)> {
        let lang = self.kb_lang.as_str();
        let mut page = self.source.intro(lang, &self.candidates(entry, word_lang)).await?;
        if page.is_none() {
            if let Some(hit) = self.source.search(lang, &entry.translated_word).await? {
                page = self.source.intro(lang, &[hit]).await?;
            }
        }

        let Some(page) = page else {
            debug!(word = %entry.word, "no page found");
            return Ok((entry.word.clone(), Vec::new()));
        };

        let intro_lines = split_lines(&page.intro, self.split_level);
        if let Some(last) = intro_lines.len().checked_sub(1) {
            self.intro_bounds.write().insert(page.title.clone(), last);
        }

        let lines = if only_intro {
            intro_lines
        } else {
            match self.source.full_text(lang, &page.title).await? {
                Some(full) => split_lines(&full, self.split_level),
                None => intro_lines,
            }
        };

        if lines.is_empty() {
            return Ok((page.title, Vec::new()));
        }
        Ok((page.title.clone(), vec![EvidencePage::new(page.title, lines)]))
    }
}

#[async_trait]
impl EvidenceFetcher for WikipediaEvidenceFetcher {
    async fn fetch_evidences_batch(
        &self,
        entries: &[FetchRequest],
        only_intro: bool,
        word_lang: &str,
    ) -> Result<(Vec<String>, Vec<Vec<EvidencePage>>)> {
        validate_requests(entries)?;

        let lookups: Vec<_> = entries.iter().map(|entry| self.fetch_one(entry, only_intro, word_lang)).collect();
        let fetched: Vec<(String, Vec<EvidencePage>)> = stream::iter(lookups)
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let found = fetched.iter().filter(|(_, pages)| !pages.is_empty()).count();
        info!(entries = entries.len(), found, only_intro, "evidence fetched");
        Ok(fetched.into_iter().unzip())
    }

    fn max_intro_sent_idx(&self) -> HashMap<String, usize> {
        self.intro_bounds.read().bounds.clone()
    }

    fn intro_boundary(&self, title: &str) -> Option<usize> {
        self.intro_bounds.read().bounds.get(title).copied()
    }
}
