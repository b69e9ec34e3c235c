use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::entailment::EntailmentClassifier;
use crate::error::VerifyError;
use crate::scoring;
use crate::types::{AtomicClaim, EvidenceAtom, Fact, Statement, StatementVerdict};

/// How evidence sentences are arranged into the premise passed to the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PremiseOrder {
    Reverse,
    /// Top-ranked sentence moved to the end, next to the fact being checked.
    #[default]
    TopLast,
    Keep,
}

impl FromStr for PremiseOrder {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reverse" => Ok(PremiseOrder::Reverse),
            "top_last" => Ok(PremiseOrder::TopLast),
            "keep" => Ok(PremiseOrder::Keep),
            other => Err(VerifyError::Config(format!(
                "premise sentence order needs to be either 'reverse', 'top_last', or 'keep', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for PremiseOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PremiseOrder::Reverse => "reverse",
            PremiseOrder::TopLast => "top_last",
            PremiseOrder::Keep => "keep",
        })
    }
}

impl PremiseOrder {
    /// Join evidence sentences into one premise string. Empty input gives an
    /// empty premise.
    pub fn order_hypothesis<S: AsRef<str>>(self, sentences: &[S]) -> String {
        let Some((first, rest)) = sentences.split_first() else {
            return String::new();
        };
        let ordered: Vec<&str> = match self {
            PremiseOrder::Reverse => sentences.iter().rev().map(AsRef::as_ref).collect(),
            PremiseOrder::TopLast => rest.iter().chain(std::iter::once(first)).map(AsRef::as_ref).collect(),
            PremiseOrder::Keep => sentences.iter().map(AsRef::as_ref).collect(),
        };
        ordered.join(" ")
    }
}

#[async_trait]
pub trait StatementVerifier: Send + Sync {
    fn premise_order(&self) -> PremiseOrder;

    fn set_premise_order(&mut self, order: &str) -> Result<(), VerifyError>;

    /// Classify each statement's facts against that statement's evidence.
    async fn verify_statement_batch(
        &self,
        statements: &[Statement],
        evidence_batch: &[Vec<EvidenceAtom>],
    ) -> Result<Vec<StatementVerdict>>;

    async fn verify_statement(&self, statement: &Statement, evidence: &[EvidenceAtom]) -> Result<StatementVerdict> {
        let mut out = self
            .verify_statement_batch(std::slice::from_ref(statement), &[evidence.to_vec()])
            .await?;
        out.pop().ok_or_else(|| anyhow::anyhow!("verifier returned no verdict"))
    }

    /// Like [`verify_statement_batch`](Self::verify_statement_batch), but every
    /// atom is judged against its own evidence subset.
    async fn verify_split_claim_batch(&self, claims: &[Vec<AtomicClaim>]) -> Result<Vec<StatementVerdict>>;

    async fn verify_split_claim(&self, atoms: &[AtomicClaim]) -> Result<StatementVerdict> {
        let mut out = self.verify_split_claim_batch(&[atoms.to_vec()]).await?;
        out.pop().ok_or_else(|| anyhow::anyhow!("verifier returned no verdict"))
    }
}

/// Statement verifier backed by an entailment classifier.
pub struct ModelStatementVerifier {
    classifier: Arc<dyn EntailmentClassifier>,
    premise_order: PremiseOrder,
}

impl ModelStatementVerifier {
    pub fn new(classifier: Arc<dyn EntailmentClassifier>, premise_order: &str) -> Result<Self, VerifyError> {
        Ok(Self { classifier, premise_order: premise_order.parse()? })
    }

    fn premise(&self, evidence: &[EvidenceAtom]) -> String {
        let sentences: Vec<&str> = evidence.iter().map(|e| e.text.as_str()).collect();
        self.premise_order.order_hypothesis(sentences.as_slice())
    }

    /// Classify `(premise, fact)` jobs in one classifier call. Jobs with an empty
    /// premise are never sent and come back unsupported.
    async fn judge(&self, jobs: Vec<Vec<(String, String)>>) -> Result<Vec<Vec<Fact>>> {
        let pairs: Vec<(String, String)> = jobs
            .iter()
            .flatten()
            .filter(|(premise, _)| !premise.is_empty())
            .cloned()
            .collect();

        let mut labels = if pairs.is_empty() {
            Vec::new().into_iter()
        } else {
            self.classifier.ensure_loaded()?;
            let labels = self.classifier.classify(&pairs).await?;
            anyhow::ensure!(labels.len() == pairs.len(), "classifier returned {} labels for {} pairs", labels.len(), pairs.len());
            labels.into_iter()
        };

        let mut out = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let mut facts = Vec::with_capacity(job.len());
            for (premise, _) in job {
                let fact = if premise.is_empty() {
                    Fact::NotSupported
                } else {
                    labels.next().map(Fact::from).unwrap_or(Fact::NotSupported)
                };
                facts.push(fact);
            }
            out.push(facts);
        }
        Ok(out)
    }
}

#[async_trait]
impl StatementVerifier for ModelStatementVerifier {
    fn premise_order(&self) -> PremiseOrder {
        self.premise_order
    }

    fn set_premise_order(&mut self, order: &str) -> Result<(), VerifyError> {
        self.premise_order = order.parse()?;
        Ok(())
    }

    async fn verify_statement_batch(
        &self,
        statements: &[Statement],
        evidence_batch: &[Vec<EvidenceAtom>],
    ) -> Result<Vec<StatementVerdict>> {
        anyhow::ensure!(
            statements.len() == evidence_batch.len(),
            "{} statements but {} evidence sets",
            statements.len(),
            evidence_batch.len()
        );

        let facts: Vec<Vec<String>> = statements.iter().map(Statement::facts).collect();
        let jobs: Vec<Vec<(String, String)>> = facts
            .iter()
            .zip(evidence_batch)
            .map(|(facts, evidence)| {
                let premise = self.premise(evidence);
                facts.iter().map(|f| (premise.clone(), f.clone())).collect::<Vec<_>>()
            })
            .collect();

        let labels = self.judge(jobs).await?;
        debug!(statements = statements.len(), order = %self.premise_order, "statements verified");
        Ok(facts
            .into_iter()
            .zip(labels)
            .map(|(facts, labels)| scoring::aggregate(facts, labels, None))
            .collect())
    }

    async fn verify_split_claim_batch(&self, claims: &[Vec<AtomicClaim>]) -> Result<Vec<StatementVerdict>> {
        let jobs: Vec<Vec<(String, String)>> = claims
            .iter()
            .map(|atoms| atoms.iter().map(|a| (self.premise(&a.evidence), a.atom.clone())).collect::<Vec<_>>())
            .collect();

        let labels = self.judge(jobs).await?;
        Ok(claims
            .iter()
            .zip(labels)
            .map(|(atoms, labels)| {
                let facts: Vec<String> = atoms.iter().map(|a| a.atom.clone()).collect();
                let evidence: Vec<Vec<EvidenceAtom>> = atoms.iter().map(|a| a.evidence.clone()).collect();
                scoring::aggregate(facts, labels, Some(evidence))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entailment::Entailment;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Entails when the hypothesis text appears verbatim in the premise.
    struct SubstringNli {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EntailmentClassifier for SubstringNli {
        fn ensure_loaded(&self) -> Result<(), VerifyError> {
            Ok(())
        }

        fn is_loaded(&self) -> bool {
            true
        }

        async fn classify(&self, pairs: &[(String, String)]) -> Result<Vec<Entailment>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(pairs
                .iter()
                .map(|(p, h)| if p.contains(h.as_str()) { Entailment::Entails } else { Entailment::NotEntails })
                .collect())
        }
    }

    fn verifier(order: &str) -> (ModelStatementVerifier, Arc<SubstringNli>) {
        let nli = Arc::new(SubstringNli { calls: AtomicUsize::new(0) });
        (ModelStatementVerifier::new(nli.clone(), order).unwrap(), nli)
    }

    fn evid(text: &str) -> EvidenceAtom {
        EvidenceAtom { title: "Sun".into(), line_idx: 0, text: text.into(), sim: 1.0, in_intro: false }
    }

    #[test]
    fn hypothesis_orderings() {
        let s = ["A", "B", "C"];
        assert_eq!(PremiseOrder::Reverse.order_hypothesis(&s), "C B A");
        assert_eq!(PremiseOrder::TopLast.order_hypothesis(&s), "B C A");
        assert_eq!(PremiseOrder::Keep.order_hypothesis(&s), "A B C");
        let empty: [&str; 0] = [];
        for order in [PremiseOrder::Reverse, PremiseOrder::TopLast, PremiseOrder::Keep] {
            assert_eq!(order.order_hypothesis(&empty), "");
        }
        assert_eq!(PremiseOrder::TopLast.order_hypothesis(&["only"]), "only");
    }

    #[test]
    fn rejects_unknown_premise_order() {
        for bad in ["", "random", "Reverse", "top-last", "keep "] {
            let err = bad.parse::<PremiseOrder>().unwrap_err();
            assert!(matches!(err, VerifyError::Config(_)), "{bad}");
        }
        let nli = Arc::new(SubstringNli { calls: AtomicUsize::new(0) });
        assert!(matches!(ModelStatementVerifier::new(nli, "shuffle"), Err(VerifyError::Config(_))));

        let (mut v, _) = verifier("keep");
        assert!(v.set_premise_order("sideways").is_err());
        assert_eq!(v.premise_order(), PremiseOrder::Keep);
        v.set_premise_order("reverse").unwrap();
        assert_eq!(v.premise_order(), PremiseOrder::Reverse);
    }

    #[tokio::test]
    async fn empty_evidence_is_not_supported_without_classifier() {
        let (v, nli) = verifier("top_last");
        let stm = Statement { text: "x".into(), splits: Some(vec!["a".into(), "b".into()]) };
        let out = v.verify_statement(&stm, &[]).await.unwrap();
        assert_eq!(out.predicted, Fact::NotSupported);
        assert_eq!(out.factuality, 0.0);
        assert_eq!(out.atoms.len(), 2);
        assert_eq!(nli.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn factuality_counts_supported_atoms() {
        let (v, nli) = verifier("top_last");
        let statements = vec![
            Statement { text: "s".into(), splits: Some(vec!["hot".into(), "cold".into(), "big".into()]) },
            Statement::whole("hot"),
        ];
        let evidence = vec![
            vec![evid("Sun is very hot."), evid("It is big.")],
            vec![evid("Sun is very hot.")],
        ];
        let out = v.verify_statement_batch(&statements, &evidence).await.unwrap();
        assert_eq!(nli.calls.load(Ordering::SeqCst), 1);
        assert!((out[0].factuality - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(out[0].predicted, Fact::NotSupported);
        assert_eq!(out[0].atoms[1].predicted, Fact::NotSupported);
        assert_eq!(out[1].factuality, 1.0);
        assert_eq!(out[1].predicted, Fact::Supported);
    }

    #[tokio::test]
    async fn split_claim_uses_per_atom_evidence() {
        let (v, _) = verifier("keep");
        let atoms = vec![
            AtomicClaim { atom: "hot".into(), evidence: vec![evid("Sun is hot.")] },
            AtomicClaim { atom: "big".into(), evidence: vec![evid("Sun is hot.")] },
            AtomicClaim { atom: "star".into(), evidence: vec![] },
        ];
        let out = v.verify_split_claim(&atoms).await.unwrap();
        assert!((out.factuality - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(out.atoms[0].predicted, Fact::Supported);
        assert_eq!(out.atoms[0].selected_evids.as_ref().unwrap()[0].text, "Sun is hot.");
        assert_eq!(out.atoms[2].predicted, Fact::NotSupported);
        assert!(out.atoms[2].selected_evids.as_ref().unwrap().is_empty());
    }
}
