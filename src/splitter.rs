use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::llm::{extract_json_block, prompt, Llm};
use crate::segments::segment_sentences;
use crate::types::Statement;

/// Splits claims into atomic facts.
#[async_trait]
pub trait ClaimSplitter: Send + Sync {
    async fn split_batch(&self, texts: &[String]) -> Result<Vec<Statement>>;

    async fn split(&self, text: &str) -> Result<Statement> {
        let mut out = self.split_batch(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| anyhow::anyhow!("claim splitter returned no statement"))
    }
}

const FACTSPLIT_SYSTEM: &str = "You split sentences into atomic facts. Each fact must be a short, \
self-contained sentence stating exactly one piece of information, with pronouns resolved. Do not add \
information that is not in the sentence. Return JSON: {\"facts\": [\"...\"]}";

#[derive(Deserialize)]
struct FactsplitReply {
    #[serde(default)]
    facts: Vec<String>,
}

pub struct LlmClaimSplitter {
    llm: Arc<dyn Llm>,
}

impl LlmClaimSplitter {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ClaimSplitter for LlmClaimSplitter {
    async fn split_batch(&self, texts: &[String]) -> Result<Vec<Statement>> {
        let prompts = texts
            .iter()
            .map(|t| prompt(FACTSPLIT_SYSTEM, format!("Sentence:\n{t}")))
            .collect::<Result<Vec<_>>>()?;
        let raw = self.llm.chat_many(prompts).await?;

        Ok(texts
            .iter()
            .zip(raw)
            .map(|(text, r)| {
                let facts: Vec<String> = serde_json::from_str::<FactsplitReply>(extract_json_block(&r))
                    .map(|reply| reply.facts)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect();
                if facts.is_empty() {
                    warn!(claim = %text, "no atomic facts extracted, verifying claim as a whole");
                }
                Statement { text: text.clone(), splits: (!facts.is_empty()).then_some(facts) }
            })
            .collect())
    }
}

/// One atomic fact per sentence.
pub struct SentenceClaimSplitter;

#[async_trait]
impl ClaimSplitter for SentenceClaimSplitter {
    async fn split_batch(&self, texts: &[String]) -> Result<Vec<Statement>> {
        Ok(texts
            .iter()
            .map(|t| {
                let sentences = segment_sentences(t);
                Statement { text: t.clone(), splits: (!sentences.is_empty()).then_some(sentences) }
            })
            .collect())
    }
}
