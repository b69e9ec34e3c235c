//! Batch verification: the full stage sequence over a list of claims.
//!
//! Every stage is called once per batch. Claims whose lookup finds no page are
//! answered immediately with `in_wiki = No` and skip the remaining stages.
//! Their results come first in the output, followed by the fully verified
//! claims in their relative input order.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::ensure;
use tracing::{debug, info};

use crate::connector::SentenceConnector;
use crate::error::{Result, Stage, VerifyError};
use crate::retrieve::{mark_intro, EvidenceFetcher, FetchRequest};
use crate::selection::EvidenceSelector;
use crate::splitter::ClaimSplitter;
use crate::translate::Translator;
use crate::types::{AtomicClaim, ClaimEntry, EvidenceAtom, EvidencePage, Statement, StatementVerdict, VerificationResult};
use crate::verification::StatementVerifier;

/// The collaborators a pipeline sequences. Translator and splitter are optional.
#[derive(Clone)]
pub struct Stages {
    pub translator: Option<Arc<dyn Translator>>,
    pub fetcher: Arc<dyn EvidenceFetcher>,
    pub connector: Arc<dyn SentenceConnector>,
    pub splitter: Option<Arc<dyn ClaimSplitter>>,
    pub selector: Arc<dyn EvidenceSelector>,
    pub verifier: Arc<dyn StatementVerifier>,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Language the connector, splitter and verifier work in.
    pub pivot_lang: String,
    /// Select evidence for every atomic fact on its own.
    pub per_atom_evidence: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { pivot_lang: "en".into(), per_atom_evidence: false }
    }
}

/// Evidence chosen for a batch of statements.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// One evidence list per statement, shared by all of its facts.
    Shared(Vec<Vec<EvidenceAtom>>),
    /// One evidence list per atomic fact.
    PerAtom(Vec<Vec<AtomicClaim>>),
}

pub struct Pipeline {
    stages: Stages,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(stages: Stages, options: PipelineOptions) -> Self {
        Self { stages, options }
    }

    pub fn stages(&self) -> &Stages {
        &self.stages
    }

    pub fn needs_translation(&self, lang: &str) -> bool {
        self.stages.translator.is_some() && lang != self.options.pivot_lang
    }

    pub async fn verify_batch(&self, entries: &[ClaimEntry], lang: &str, only_intro: bool) -> Result<Vec<VerificationResult>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let translated = self.translate(entries, lang).await.map_err(|e| VerifyError::stage(Stage::Translate, e))?;
        let requests = fetch_requests(entries, &translated);
        let (words, evidences) = self
            .stages
            .fetcher
            .fetch_evidences_batch(&requests, only_intro, lang)
            .await
            .map_err(|e| VerifyError::stage(Stage::Fetch, e))?;
        if words.len() != entries.len() || evidences.len() != entries.len() {
            return Err(VerifyError::stage(
                Stage::Fetch,
                anyhow::anyhow!("fetched {} evidence sets for {} entries", evidences.len(), entries.len()),
            ));
        }

        let mut results = Vec::with_capacity(entries.len());
        let mut sources = Vec::new();
        let mut inputs = Vec::new();
        let mut pages = Vec::new();
        for (((entry, translation), word), evid) in entries.iter().zip(translated).zip(words).zip(evidences) {
            if evid.is_empty() {
                results.push(VerificationResult::not_in_wiki(entry.word.clone(), entry.text.clone()));
            } else {
                inputs.push(connector_input(entry, translation, word));
                sources.push(entry);
                pages.push(evid);
            }
        }
        info!(entries = entries.len(), missing = results.len(), lang, "evidence partitioned");
        if sources.is_empty() {
            return Ok(results);
        }

        let connected = self.connect(&inputs).await.map_err(|e| VerifyError::stage(Stage::Connect, e))?;
        let statements = self.split(&connected).await.map_err(|e| VerifyError::stage(Stage::Split, e))?;
        let selection = self.select(&statements, &pages).await.map_err(|e| VerifyError::stage(Stage::Select, e))?;
        let verdicts = self.judge(&statements, selection).await.map_err(|e| VerifyError::stage(Stage::Verify, e))?;

        results.extend(
            sources
                .into_iter()
                .zip(verdicts)
                .map(|(src, (verdict, selected))| VerificationResult::verified(src.word.clone(), src.text.clone(), verdict, selected)),
        );
        Ok(results)
    }

    pub async fn verify(&self, word: Option<String>, claim: impl Into<String>, lang: &str, only_intro: bool) -> Result<VerificationResult> {
        let mut out = self.verify_batch(&[ClaimEntry::new(word, claim)], lang, only_intro).await?;
        out.pop()
            .ok_or_else(|| VerifyError::stage(Stage::Verify, anyhow::anyhow!("pipeline produced no result")))
    }

    /// Entries in the pivot language; unchanged when no translation is needed.
    pub(crate) async fn translate(&self, entries: &[ClaimEntry], lang: &str) -> anyhow::Result<Vec<ClaimEntry>> {
        let Some(translator) = self.stages.translator.as_ref().filter(|_| self.needs_translation(lang)) else {
            return Ok(entries.to_vec());
        };
        let out = translator.translate_batch(entries, lang, &self.options.pivot_lang).await?;
        ensure!(out.len() == entries.len(), "translated {} of {} entries", out.len(), entries.len());
        debug!(entries = entries.len(), from = lang, to = %self.options.pivot_lang, "translated");
        Ok(out)
    }

    pub(crate) async fn connect(&self, entries: &[ClaimEntry]) -> anyhow::Result<Vec<ClaimEntry>> {
        let out = self.stages.connector.connect_batch(entries).await?;
        ensure!(out.len() == entries.len(), "connected {} of {} entries", out.len(), entries.len());
        Ok(out)
    }

    pub(crate) async fn split(&self, connected: &[ClaimEntry]) -> anyhow::Result<Vec<Statement>> {
        let texts: Vec<String> = connected.iter().map(|e| e.text.clone()).collect();
        let Some(splitter) = &self.stages.splitter else {
            return Ok(texts.into_iter().map(Statement::whole).collect());
        };
        let out = splitter.split_batch(&texts).await?;
        ensure!(out.len() == texts.len(), "split {} of {} claims", out.len(), texts.len());
        Ok(out)
    }

    /// Select evidence and flag the lines that come from a page intro.
    pub(crate) async fn select(&self, statements: &[Statement], pages: &[Vec<EvidencePage>]) -> anyhow::Result<Selection> {
        ensure!(statements.len() == pages.len(), "{} statements but {} evidence sets", statements.len(), pages.len());
        let fetcher = &self.stages.fetcher;
        let intro = |title: &str| fetcher.intro_boundary(title);

        if !self.options.per_atom_evidence {
            let mut selected = self.stages.selector.select_evidences_batch(statements, pages).await?;
            ensure!(selected.len() == statements.len(), "selected evidence for {} of {} statements", selected.len(), statements.len());
            for atoms in &mut selected {
                mark_intro(atoms, intro);
            }
            return Ok(Selection::Shared(selected));
        }

        let mut atom_statements = Vec::new();
        let mut atom_pages = Vec::new();
        for (statement, evid) in statements.iter().zip(pages) {
            for fact in statement.facts() {
                atom_statements.push(Statement::whole(fact));
                atom_pages.push(evid.clone());
            }
        }
        let selected = self.stages.selector.select_evidences_batch(&atom_statements, &atom_pages).await?;
        ensure!(selected.len() == atom_statements.len(), "selected evidence for {} of {} atoms", selected.len(), atom_statements.len());

        let mut selected = selected.into_iter();
        let mut atom_texts = atom_statements.into_iter();
        let claims = statements
            .iter()
            .map(|statement| {
                (0..statement.facts().len())
                    .filter_map(|_| {
                        let atom = atom_texts.next()?.text;
                        let mut evidence = selected.next()?;
                        mark_intro(&mut evidence, intro);
                        Some(AtomicClaim { atom, evidence })
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        Ok(Selection::PerAtom(claims))
    }

    /// Verdict and top-level selected evidence per statement.
    pub(crate) async fn judge(
        &self,
        statements: &[Statement],
        selection: Selection,
    ) -> anyhow::Result<Vec<(StatementVerdict, Vec<EvidenceAtom>)>> {
        let verifier = &self.stages.verifier;
        let (verdicts, selected) = match selection {
            Selection::Shared(selected) => (verifier.verify_statement_batch(statements, &selected).await?, selected),
            Selection::PerAtom(claims) => {
                let verdicts = verifier.verify_split_claim_batch(&claims).await?;
                let union: Vec<Vec<EvidenceAtom>> = claims.iter().map(|atoms| evidence_union(atoms)).collect();
                (verdicts, union)
            }
        };
        ensure!(verdicts.len() == statements.len(), "verified {} of {} statements", verdicts.len(), statements.len());
        Ok(verdicts.into_iter().zip(selected).collect())
    }
}

/// Fetcher input: the entry's own lookup term plus its pivot-language one.
pub(crate) fn fetch_requests(entries: &[ClaimEntry], translated: &[ClaimEntry]) -> Vec<FetchRequest> {
    entries
        .iter()
        .zip(translated)
        .map(|(src, tr)| FetchRequest::new(src.lookup_term(), tr.lookup_term()))
        .collect()
}

/// The translated claim, labelled with the resolved page title when the entry
/// is a definition.
pub(crate) fn connector_input(source: &ClaimEntry, translated: ClaimEntry, evidence_word: String) -> ClaimEntry {
    ClaimEntry {
        word: source.word.as_ref().map(|_| evidence_word),
        text: translated.text,
        translated_word: translated.word,
    }
}

fn evidence_union(atoms: &[AtomicClaim]) -> Vec<EvidenceAtom> {
    let mut seen = HashSet::new();
    atoms
        .iter()
        .flat_map(|a| a.evidence.iter())
        .filter(|e| seen.insert((e.title.clone(), e.line_idx)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evid(title: &str, line_idx: usize) -> EvidenceAtom {
        EvidenceAtom { title: title.into(), line_idx, text: format!("{title} {line_idx}"), sim: 1.0, in_intro: false }
    }

    #[test]
    fn union_dedups_in_first_seen_order() {
        let atoms = vec![
            AtomicClaim { atom: "a".into(), evidence: vec![evid("Sun", 2), evid("Sun", 0)] },
            AtomicClaim { atom: "b".into(), evidence: vec![evid("Sun", 0), evid("Star", 0)] },
        ];
        let keys: Vec<(String, usize)> = evidence_union(&atoms).into_iter().map(|e| (e.title, e.line_idx)).collect();
        assert_eq!(keys, vec![("Sun".into(), 2), ("Sun".into(), 0), ("Star".into(), 0)]);
    }

    #[test]
    fn statements_keep_no_word_for_the_connector() {
        let src = ClaimEntry::new(None, "Die Sonne ist ein Stern.");
        let tr = ClaimEntry::new(None, "The sun is a star.");
        let input = connector_input(&src, tr, "Sun".into());
        assert_eq!(input.word, None);
        assert_eq!(input.text, "The sun is a star.");

        let def = ClaimEntry::new(Some("Einhorn".into()), "Fabelwesen");
        let tr = ClaimEntry::new(Some("unicorn".into()), "mythical creature");
        let input = connector_input(&def, tr, "Unicorn".into());
        assert_eq!(input.word.as_deref(), Some("Unicorn"));
        assert_eq!(input.translated_word.as_deref(), Some("unicorn"));
    }

    #[test]
    fn fetch_requests_pair_source_and_translation() {
        let src = [ClaimEntry::new(Some("Einhorn".into()), "x"), ClaimEntry::new(None, "Die Sonne")];
        let tr = [ClaimEntry::new(Some("unicorn".into()), "y"), ClaimEntry::new(None, "The sun")];
        let reqs = fetch_requests(&src, &tr);
        assert_eq!(reqs[0], FetchRequest::new("Einhorn", "unicorn"));
        assert_eq!(reqs[1], FetchRequest::new("Die Sonne", "The sun"));
    }
}
