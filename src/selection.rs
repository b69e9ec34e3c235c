use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::error::VerifyError;
use crate::segments::tokenize;
use crate::types::{EvidenceAtom, EvidencePage, Statement};

/// Picks the evidence lines relevant to each statement.
#[async_trait]
pub trait EvidenceSelector: Send + Sync {
    fn load(&self) -> Result<(), VerifyError> {
        Ok(())
    }

    fn unload(&self) {}

    /// Ranked evidence per statement, best first.
    async fn select_evidences_batch(
        &self,
        statements: &[Statement],
        evidence_batch: &[Vec<EvidencePage>],
    ) -> Result<Vec<Vec<EvidenceAtom>>>;

    async fn select_evidences(&self, statement: &Statement, pages: &[EvidencePage]) -> Result<Vec<EvidenceAtom>> {
        let mut out = self
            .select_evidences_batch(std::slice::from_ref(statement), &[pages.to_vec()])
            .await?;
        out.pop().ok_or_else(|| anyhow::anyhow!("evidence selector returned no selection"))
    }
}

/// Lexical BM25 ranking over every line of a claim's pages.
pub struct Bm25EvidenceSelector {
    top_k: usize,
    k1: f32,
    b: f32,
}

impl Bm25EvidenceSelector {
    pub fn new(top_k: usize) -> Self {
        Self { top_k, k1: 1.5, b: 0.75 }
    }

    fn query_terms(statement: &Statement) -> Vec<String> {
        let mut terms = tokenize(&statement.text);
        for split in statement.splits.iter().flatten() {
            terms.extend(tokenize(split));
        }
        let mut seen = HashSet::new();
        terms.retain(|t| seen.insert(t.clone()));
        terms
    }

    /// BM25 score per document; idf is the non-negative `ln(1 + (N - n + .5) / (n + .5))`.
    fn scores(&self, query: &[String], docs: &[Vec<String>]) -> Vec<f32> {
        let n_docs = docs.len() as f32;
        let avgdl = docs.iter().map(Vec::len).sum::<usize>() as f32 / n_docs.max(1.0);

        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for doc in docs {
            let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
            for term in unique {
                *doc_freq.entry(term).or_default() += 1;
            }
        }

        docs.iter()
            .map(|doc| {
                let len_norm = 1.0 - self.b + self.b * doc.len() as f32 / avgdl.max(f32::EPSILON);
                query
                    .iter()
                    .filter_map(|q| {
                        let n = *doc_freq.get(q.as_str())? as f32;
                        let tf = doc.iter().filter(|t| *t == q).count() as f32;
                        let idf = (1.0 + (n_docs - n + 0.5) / (n + 0.5)).ln();
                        Some(idf * tf * (self.k1 + 1.0) / (tf + self.k1 * len_norm))
                    })
                    .sum()
            })
            .collect()
    }

    fn select(&self, statement: &Statement, pages: &[EvidencePage]) -> Vec<EvidenceAtom> {
        let lines: Vec<(&str, usize, &str)> = pages
            .iter()
            .flat_map(|p| p.iter_lines().map(move |(idx, text)| (p.title.as_str(), idx, text)))
            .collect();
        let docs: Vec<Vec<String>> = lines.iter().map(|(_, _, text)| tokenize(text)).collect();
        let scores = self.scores(&Self::query_terms(statement), &docs);

        let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().filter(|(_, s)| *s > 0.0).collect();
        // stable sort keeps page order among equal scores
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        ranked.truncate(self.top_k);

        ranked
            .into_iter()
            .map(|(i, sim)| {
                let (title, line_idx, text) = lines[i];
                EvidenceAtom { title: title.to_string(), line_idx, text: text.to_string(), sim, in_intro: false }
            })
            .collect()
    }
}

#[async_trait]
impl EvidenceSelector for Bm25EvidenceSelector {
    async fn select_evidences_batch(
        &self,
        statements: &[Statement],
        evidence_batch: &[Vec<EvidencePage>],
    ) -> Result<Vec<Vec<EvidenceAtom>>> {
        anyhow::ensure!(
            statements.len() == evidence_batch.len(),
            "{} statements but {} evidence sets",
            statements.len(),
            evidence_batch.len()
        );
        let selected: Vec<Vec<EvidenceAtom>> = statements
            .iter()
            .zip(evidence_batch)
            .map(|(statement, pages)| self.select(statement, pages))
            .collect();
        debug!(statements = statements.len(), top_k = self.top_k, "evidence selected");
        Ok(selected)
    }
}
