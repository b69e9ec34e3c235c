//! Entailment classification: (premise, hypothesis) pairs to support labels.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::VerifyError;
use crate::llm::{extract_json_block, prompt, Llm};
use crate::model::LazyModel;

/// Classifier label. Label 0 means the premise entails the hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entailment {
    Entails = 0,
    NotEntails = 1,
}

impl Entailment {
    pub fn is_supported(self) -> bool {
        self == Entailment::Entails
    }
}

impl TryFrom<usize> for Entailment {
    type Error = anyhow::Error;

    fn try_from(label: usize) -> Result<Self> {
        match label {
            0 => Ok(Entailment::Entails),
            1 => Ok(Entailment::NotEntails),
            other => anyhow::bail!("unknown entailment label {other}"),
        }
    }
}

#[async_trait]
pub trait EntailmentClassifier: Send + Sync {
    /// Idempotent; a failure leaves the classifier unloaded and retryable.
    fn ensure_loaded(&self) -> Result<(), VerifyError>;

    fn unload(&self) {}

    fn is_loaded(&self) -> bool;

    /// One label per `(premise, hypothesis)` pair, in input order.
    async fn classify(&self, pairs: &[(String, String)]) -> Result<Vec<Entailment>>;
}

const NLI_SYSTEM: &str = "You are a natural language inference model. Decide whether the PREMISE \
entails the HYPOTHESIS using only the premise. Return JSON: {\"label\": \"entailment\" | \"not_entailment\"}";

#[derive(Deserialize)]
struct NliReply {
    label: String,
}

/// Entailment via an OpenAI-compatible chat model.
pub struct LlmEntailmentClassifier {
    llm: LazyModel<Arc<dyn Llm>>,
}

impl LlmEntailmentClassifier {
    pub fn new(name: impl Into<String>, loader: impl Fn() -> Result<Arc<dyn Llm>> + Send + Sync + 'static) -> Self {
        Self { llm: LazyModel::new(name, loader) }
    }

    fn parse_label(raw: &str) -> Entailment {
        let label = serde_json::from_str::<NliReply>(extract_json_block(raw))
            .map(|r| r.label.trim().to_lowercase())
            .unwrap_or_default();
        match label.as_str() {
            "entailment" => Entailment::Entails,
            _ => Entailment::NotEntails, // contradiction and neutral collapse to not supported
        }
    }
}

#[async_trait]
impl EntailmentClassifier for LlmEntailmentClassifier {
    fn ensure_loaded(&self) -> Result<(), VerifyError> {
        self.llm.ensure_loaded().map(|_| ())
    }

    fn unload(&self) {
        self.llm.unload();
    }

    fn is_loaded(&self) -> bool {
        self.llm.is_loaded()
    }

    async fn classify(&self, pairs: &[(String, String)]) -> Result<Vec<Entailment>> {
        let llm = self.llm.ensure_loaded()?;
        let prompts = pairs
            .iter()
            .map(|(premise, hypothesis)| {
                prompt(NLI_SYSTEM, format!("PREMISE:\n{premise}\n\nHYPOTHESIS:\n{hypothesis}"))
            })
            .collect::<Result<Vec<_>>>()?;
        let outs = llm.chat_many(prompts).await?;
        anyhow::ensure!(
            outs.len() == pairs.len(),
            "classifier returned {} labels for {} pairs",
            outs.len(),
            pairs.len()
        );
        let labels: Vec<Entailment> = outs.iter().map(|o| Self::parse_label(o)).collect();
        debug!(pairs = pairs.len(), supported = labels.iter().filter(|l| l.is_supported()).count(), "classified");
        Ok(labels)
    }
}
