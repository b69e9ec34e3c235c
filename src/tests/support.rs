use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_openai::types::ChatCompletionRequestMessage;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connector::{ColonSentenceConnector, SentenceConnector};
use crate::entailment::{Entailment, EntailmentClassifier};
use crate::error::VerifyError;
use crate::llm::Llm;
use crate::pipeline::{Pipeline, PipelineOptions, Stages};
use crate::retrieve::{validate_requests, EvidenceFetcher, FetchRequest};
use crate::segments::tokenize;
use crate::selection::EvidenceSelector;
use crate::splitter::ClaimSplitter;
use crate::translate::Translator;
use crate::types::{ClaimEntry, EvidenceAtom, EvidencePage, Statement};
use crate::verification::ModelStatementVerifier;

/// Names of the stage calls made, in order.
#[derive(Default)]
pub struct CallLog(Mutex<Vec<&'static str>>);

impl CallLog {
    pub fn record(&self, call: &'static str) {
        self.0.lock().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.0.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.0.lock().iter().filter(|c| **c == call).count()
    }
}

/// German to English word list; text is tagged rather than translated.
pub struct FakeTranslator {
    pub log: Arc<CallLog>,
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate_batch(&self, entries: &[ClaimEntry], _source_lang: &str, _target_lang: &str) -> Result<Vec<ClaimEntry>> {
        self.log.record("translate");
        Ok(entries
            .iter()
            .map(|e| ClaimEntry {
                word: e.word.as_deref().map(|w| match w {
                    "Einhorn" => "unicorn".to_string(),
                    "Sonne" => "sun".to_string(),
                    other => other.to_string(),
                }),
                text: e.text.replace("Einhorn", "unicorn"),
                translated_word: None,
            })
            .collect())
    }
}

/// Knowledge base of a few pages keyed by lowercase lookup term.
pub struct FakeFetcher {
    pub log: Arc<CallLog>,
    pub pages: HashMap<String, (String, Vec<String>, usize)>,
}

impl FakeFetcher {
    pub fn new(log: Arc<CallLog>) -> Self {
        let mut pages = HashMap::new();
        pages.insert(
            "unicorn".to_string(),
            (
                "Unicorn".to_string(),
                vec![
                    "The unicorn is a legendary creature.".to_string(),
                    "It is a horse with a single horn.".to_string(),
                    "It is often white.".to_string(),
                    "Unicorns appear in heraldry.".to_string(),
                ],
                1,
            ),
        );
        pages.insert(
            "sun".to_string(),
            (
                "Sun".to_string(),
                vec!["The Sun is the star at the center of the Solar System.".to_string(), "The sun is hot.".to_string()],
                0,
            ),
        );
        Self { log, pages }
    }

    fn lookup(&self, req: &FetchRequest) -> Option<&(String, Vec<String>, usize)> {
        [&req.translated_word, &req.word].into_iter().find_map(|term| {
            let term = term.to_lowercase();
            self.pages.get(&term).or_else(|| self.pages.iter().find(|(k, _)| term.contains(k.as_str())).map(|(_, v)| v))
        })
    }
}

#[async_trait]
impl EvidenceFetcher for FakeFetcher {
    async fn fetch_evidences_batch(
        &self,
        entries: &[FetchRequest],
        _only_intro: bool,
        _word_lang: &str,
    ) -> Result<(Vec<String>, Vec<Vec<EvidencePage>>)> {
        self.log.record("fetch");
        validate_requests(entries)?;
        Ok(entries
            .iter()
            .map(|req| match self.lookup(req) {
                Some((title, lines, _)) => (title.clone(), vec![EvidencePage::new(title.clone(), lines.clone())]),
                None => (req.word.clone(), Vec::new()),
            })
            .unzip())
    }

    fn max_intro_sent_idx(&self) -> HashMap<String, usize> {
        self.pages.values().map(|(title, _, intro)| (title.clone(), *intro)).collect()
    }
}

pub struct RecordingConnector {
    pub log: Arc<CallLog>,
}

#[async_trait]
impl SentenceConnector for RecordingConnector {
    async fn connect_batch(&self, entries: &[ClaimEntry]) -> Result<Vec<ClaimEntry>> {
        self.log.record("connect");
        ColonSentenceConnector.connect_batch(entries).await
    }
}

/// Splits on " and ".
pub struct AndSplitter {
    pub log: Arc<CallLog>,
}

#[async_trait]
impl ClaimSplitter for AndSplitter {
    async fn split_batch(&self, texts: &[String]) -> Result<Vec<Statement>> {
        self.log.record("split");
        Ok(texts
            .iter()
            .map(|t| Statement {
                text: t.clone(),
                splits: Some(t.split(" and ").map(|s| s.trim().to_string()).collect()),
            })
            .collect())
    }
}

/// Keeps the lines sharing a word of four or more letters with the statement
/// (or any of its splits), scored by the number of shared words. `block_for`
/// holds the calling thread before answering, like a synchronous ranker.
pub struct OverlapSelector {
    pub log: Arc<CallLog>,
    pub fail: bool,
    pub block_for: Duration,
}

#[async_trait]
impl EvidenceSelector for OverlapSelector {
    async fn select_evidences_batch(&self, statements: &[Statement], evidence_batch: &[Vec<EvidencePage>]) -> Result<Vec<Vec<EvidenceAtom>>> {
        self.log.record("select");
        anyhow::ensure!(!self.fail, "selector exploded");
        if !self.block_for.is_zero() {
            std::thread::sleep(self.block_for);
        }
        Ok(statements
            .iter()
            .zip(evidence_batch)
            .map(|(stm, pages)| {
                let mut query = tokenize(&stm.text);
                for s in stm.splits.iter().flatten() {
                    query.extend(tokenize(s));
                }
                query.retain(|w| w.chars().count() >= 4);
                let mut atoms = Vec::new();
                for page in pages {
                    for (idx, text) in page.iter_lines() {
                        let line = tokenize(text);
                        let shared = query.iter().filter(|q| line.contains(q)).count();
                        if shared > 0 {
                            atoms.push(EvidenceAtom {
                                title: page.title.clone(),
                                line_idx: idx,
                                text: text.to_string(),
                                sim: shared as f32,
                                in_intro: false,
                            });
                        }
                    }
                }
                atoms.sort_by(|a, b| b.sim.total_cmp(&a.sim));
                atoms
            })
            .collect())
    }
}

/// Entails when every word of four or more letters in the hypothesis occurs
/// in the premise.
pub struct KeywordNli {
    pub log: Arc<CallLog>,
}

#[async_trait]
impl EntailmentClassifier for KeywordNli {
    fn ensure_loaded(&self) -> Result<(), VerifyError> {
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        true
    }

    async fn classify(&self, pairs: &[(String, String)]) -> Result<Vec<Entailment>> {
        self.log.record("classify");
        Ok(pairs
            .iter()
            .map(|(premise, hypothesis)| {
                let premise = tokenize(premise);
                let entails = tokenize(hypothesis)
                    .iter()
                    .filter(|w| w.chars().count() >= 4)
                    .all(|w| premise.contains(w));
                if entails { Entailment::Entails } else { Entailment::NotEntails }
            })
            .collect())
    }
}

/// Chat model that answers "entailment" to every prompt.
pub struct EntailingLlm;

#[async_trait]
impl Llm for EntailingLlm {
    async fn chat_many(&self, prompts: Vec<Vec<ChatCompletionRequestMessage>>) -> Result<Vec<String>> {
        Ok(prompts.iter().map(|_| r#"{"label":"entailment"}"#.to_string()).collect())
    }
}

pub struct Harness {
    pub log: Arc<CallLog>,
    pub pipeline: Arc<Pipeline>,
}

#[derive(Default)]
pub struct HarnessOpts {
    pub translate: bool,
    pub split: bool,
    pub per_atom: bool,
    pub failing_selector: bool,
    pub selector_blocks_for: Duration,
    /// Replaces the keyword classifier.
    pub classifier: Option<Arc<dyn EntailmentClassifier>>,
}

pub fn harness(opts: HarnessOpts) -> Harness {
    let log = Arc::new(CallLog::default());
    let classifier = opts
        .classifier
        .unwrap_or_else(|| Arc::new(KeywordNli { log: log.clone() }) as Arc<dyn EntailmentClassifier>);
    let stages = Stages {
        translator: opts.translate.then(|| Arc::new(FakeTranslator { log: log.clone() }) as Arc<dyn Translator>),
        fetcher: Arc::new(FakeFetcher::new(log.clone())),
        connector: Arc::new(RecordingConnector { log: log.clone() }),
        splitter: opts.split.then(|| Arc::new(AndSplitter { log: log.clone() }) as Arc<dyn ClaimSplitter>),
        selector: Arc::new(OverlapSelector { log: log.clone(), fail: opts.failing_selector, block_for: opts.selector_blocks_for }),
        verifier: Arc::new(ModelStatementVerifier::new(classifier, "top_last").unwrap()),
    };
    let options = PipelineOptions { pivot_lang: "en".into(), per_atom_evidence: opts.per_atom };
    Harness { log, pipeline: Arc::new(Pipeline::new(stages, options)) }
}
