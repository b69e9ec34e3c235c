use crate::entailment::Entailment;
use crate::types::{AtomVerdict, EvidenceAtom, Fact, StatementVerdict};

/// Fraction of supported facts; 0 for an empty set.
pub fn factuality(labels: &[Fact]) -> f64 {
    if labels.is_empty() {
        return Fact::NotSupported.to_factuality();
    }
    let supported = labels.iter().filter(|l| matches!(l, Fact::Supported)).count();
    supported as f64 / labels.len() as f64
}

/// A statement is supported only when every one of its facts is.
pub fn overall(factuality: f64) -> Fact {
    if factuality == 1.0 { Fact::Supported } else { Fact::NotSupported }
}

impl From<Entailment> for Fact {
    fn from(label: Entailment) -> Self {
        if label.is_supported() { Fact::Supported } else { Fact::NotSupported }
    }
}

/// Aggregate per-fact labels into a statement verdict. `evidence` is the per-atom
/// evidence when each atom was judged against its own selection.
pub fn aggregate(facts: Vec<String>, labels: Vec<Fact>, evidence: Option<Vec<Vec<EvidenceAtom>>>) -> StatementVerdict {
    let factuality = factuality(&labels);
    let mut evidence = evidence.map(|e| e.into_iter());
    let atoms = facts
        .into_iter()
        .zip(labels)
        .map(|(atom, predicted)| AtomVerdict {
            atom,
            predicted,
            selected_evids: evidence.as_mut().and_then(|it| it.next()),
        })
        .collect();
    StatementVerdict { predicted: overall(factuality), factuality, atoms }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factuality_is_k_over_n() {
        use Fact::*;
        assert_eq!(factuality(&[Supported, NotSupported, Supported, Supported]), 0.75);
        assert_eq!(factuality(&[Supported; 3]), 1.0);
        assert_eq!(factuality(&[NotSupported]), 0.0);
        assert_eq!(factuality(&[]), 0.0);
    }

    #[test]
    fn supported_iff_all_facts_supported() {
        use Fact::*;
        let v = aggregate(vec!["a".into(), "b".into()], vec![Supported, Supported], None);
        assert_eq!(v.predicted, Supported);
        let v = aggregate(vec!["a".into(), "b".into()], vec![Supported, NotSupported], None);
        assert_eq!(v.predicted, NotSupported);
        assert_eq!(v.factuality, 0.5);
        assert_eq!(v.atoms[1].atom, "b");
        assert_eq!(v.atoms[1].predicted, NotSupported);
        assert!(v.atoms[0].selected_evids.is_none());
    }

    #[test]
    fn per_atom_evidence_is_attached_in_order() {
        let ev = |t: &str| EvidenceAtom { title: "Sun".into(), line_idx: 0, text: t.into(), sim: 1.0, in_intro: true };
        let v = aggregate(
            vec!["hot".into(), "big".into()],
            vec![Fact::Supported, Fact::NotSupported],
            Some(vec![vec![ev("Sun is hot.")], vec![]]),
        );
        assert_eq!(v.atoms[0].selected_evids.as_ref().unwrap()[0].text, "Sun is hot.");
        assert!(v.atoms[1].selected_evids.as_ref().unwrap().is_empty());
    }
}
