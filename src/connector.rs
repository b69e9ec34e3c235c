use anyhow::Result;
use async_trait::async_trait;

use crate::types::ClaimEntry;

/// Normalises a claim into one self-contained sentence.
#[async_trait]
pub trait SentenceConnector: Send + Sync {
    async fn connect_batch(&self, entries: &[ClaimEntry]) -> Result<Vec<ClaimEntry>>;

    async fn connect(&self, entry: &ClaimEntry) -> Result<ClaimEntry> {
        let mut out = self.connect_batch(std::slice::from_ref(entry)).await?;
        out.pop().ok_or_else(|| anyhow::anyhow!("sentence connector returned no entry"))
    }
}

/// Prefixes a definition with its word: `"<word>: <text>"`.
pub struct ColonSentenceConnector;

impl ColonSentenceConnector {
    fn join(word: Option<&str>, text: &str) -> String {
        match word.map(str::trim).filter(|w| !w.is_empty()) {
            Some(word) => format!("{word}: {}", text.trim()),
            None => text.trim().to_string(),
        }
    }
}

#[async_trait]
impl SentenceConnector for ColonSentenceConnector {
    async fn connect_batch(&self, entries: &[ClaimEntry]) -> Result<Vec<ClaimEntry>> {
        Ok(entries
            .iter()
            .map(|e| ClaimEntry { text: Self::join(e.word.as_deref(), &e.text), ..e.clone() })
            .collect())
    }
}
