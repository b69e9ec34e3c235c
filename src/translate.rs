use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::llm::{extract_json_block, prompt, Llm};
use crate::types::ClaimEntry;

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate the `word` and `text` of every entry from `source_lang` into
    /// `target_lang`. Output has the same length and order as the input.
    async fn translate_batch(&self, entries: &[ClaimEntry], source_lang: &str, target_lang: &str) -> Result<Vec<ClaimEntry>>;

    async fn translate(&self, entry: &ClaimEntry, source_lang: &str, target_lang: &str) -> Result<ClaimEntry> {
        let mut out = self.translate_batch(std::slice::from_ref(entry), source_lang, target_lang).await?;
        out.pop().ok_or_else(|| anyhow::anyhow!("translator returned no entry"))
    }
}

const TRANSLATE_SYSTEM: &str = "You are a precise translator for dictionary entries. Translate the WORD and \
the TEXT faithfully, keeping the meaning and register. Return JSON: {\"word\": \"...\", \"text\": \"...\"}. \
Use an empty string for a missing word.";

#[derive(Deserialize)]
struct TranslationReply {
    #[serde(default)]
    word: String,
    text: String,
}

pub struct LlmTranslator {
    llm: Arc<dyn Llm>,
}

impl LlmTranslator {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    async fn translate_batch(&self, entries: &[ClaimEntry], source_lang: &str, target_lang: &str) -> Result<Vec<ClaimEntry>> {
        let prompts = entries
            .iter()
            .map(|e| {
                prompt(
                    TRANSLATE_SYSTEM,
                    format!(
                        "Translate from '{source_lang}' to '{target_lang}'.\nWORD: {}\nTEXT: {}",
                        e.word.as_deref().unwrap_or(""),
                        e.text
                    ),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let outs = self.llm.chat_many(prompts).await?;

        Ok(entries
            .iter()
            .zip(outs)
            .map(|(entry, raw)| match serde_json::from_str::<TranslationReply>(extract_json_block(&raw)) {
                Ok(reply) => ClaimEntry {
                    word: entry.word.as_ref().map(|w| if reply.word.trim().is_empty() { w.clone() } else { reply.word.trim().to_string() }),
                    text: reply.text.trim().to_string(),
                    translated_word: None,
                },
                Err(e) => {
                    warn!(error = %e, "malformed translation, keeping source text");
                    entry.clone()
                }
            })
            .collect())
    }
}
