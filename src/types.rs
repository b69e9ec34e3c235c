use serde::{Deserialize, Serialize};

/// One claim to check, optionally about a subject word.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,       // absent for pure statement verification
    pub text: String,               // claim or definition being checked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_word: Option<String>,
}

impl ClaimEntry {
    pub fn new(word: Option<String>, text: impl Into<String>) -> Self {
        Self { word, text: text.into(), translated_word: None }
    }

    /// Term used to look the entry up in the knowledge base. Statements without
    /// a subject word fall back to their own text.
    pub fn lookup_term(&self) -> &str {
        self.word.as_deref().filter(|w| !w.trim().is_empty()).unwrap_or(&self.text)
    }
}

/// A titled knowledge-base page as ordered lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePage {
    pub title: String,
    pub lines: Vec<String>,
    pub line_indices: Vec<usize>,   // same length as `lines`
}

impl EvidencePage {
    pub fn new(title: impl Into<String>, lines: Vec<String>) -> Self {
        let line_indices = (0..lines.len()).collect();
        Self { title: title.into(), lines, line_indices }
    }

    pub fn iter_lines(&self) -> impl Iterator<Item = (usize, &str)> {
        self.line_indices.iter().copied().zip(self.lines.iter().map(String::as_str))
    }
}

/// One selected evidence line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceAtom {
    pub title: String,
    pub line_idx: usize,
    pub text: String,
    pub sim: f32,
    #[serde(default)]
    pub in_intro: bool,
}

/// Claim text after connection, with its atomic facts once split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub splits: Option<Vec<String>>,
}

impl Statement {
    pub fn whole(text: impl Into<String>) -> Self {
        Self { text: text.into(), splits: None }
    }

    /// The facts to classify: the splits when present, otherwise the text.
    pub fn facts(&self) -> Vec<String> {
        match &self.splits {
            Some(splits) if !splits.is_empty() => splits.clone(),
            _ => vec![self.text.clone()],
        }
    }
}

/// An atomic fact paired with the evidence selected for it alone.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicClaim {
    pub atom: String,
    pub evidence: Vec<EvidenceAtom>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Fact {
    Supported,
    NotSupported,
}

impl Fact {
    pub fn to_factuality(self) -> f64 {
        match self {
            Fact::Supported => 1.0,
            Fact::NotSupported => 0.0,
        }
    }
}

/// Overall prediction; `Unknown` marks claims that never reached the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Predicted {
    Supported,
    NotSupported,
    #[serde(rename = "")]
    Unknown,
}

impl From<Fact> for Predicted {
    fn from(fact: Fact) -> Self {
        match fact {
            Fact::Supported => Predicted::Supported,
            Fact::NotSupported => Predicted::NotSupported,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InWiki {
    Yes,
    No,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomVerdict {
    pub atom: String,
    pub predicted: Fact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_evids: Option<Vec<EvidenceAtom>>,
}

/// Verifier output for one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementVerdict {
    pub predicted: Fact,
    pub factuality: f64,
    pub atoms: Vec<AtomVerdict>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub word: Option<String>,
    pub claim: String,
    pub predicted: Predicted,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factuality: Option<f64>,
    pub in_wiki: InWiki,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atoms: Option<Vec<AtomVerdict>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_evidences: Option<Vec<EvidenceAtom>>,
}

impl VerificationResult {
    /// Result for a claim whose lookup produced no evidence.
    pub fn not_in_wiki(word: Option<String>, claim: String) -> Self {
        Self {
            word,
            claim,
            predicted: Predicted::Unknown,
            factuality: None,
            in_wiki: InWiki::No,
            atoms: None,
            selected_evidences: None,
        }
    }

    pub fn verified(
        word: Option<String>,
        claim: String,
        verdict: StatementVerdict,
        selected: Vec<EvidenceAtom>,
    ) -> Self {
        Self {
            word,
            claim,
            predicted: verdict.predicted.into(),
            factuality: Some(verdict.factuality),
            in_wiki: InWiki::Yes,
            atoms: Some(verdict.atoms),
            selected_evidences: Some(selected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_prediction_serializes_as_empty_string() {
        let res = VerificationResult::not_in_wiki(Some("xyzzy".into()), "a made up thing".into());
        let v = serde_json::to_value(&res).unwrap();
        assert_eq!(v["predicted"], "");
        assert_eq!(v["in_wiki"], "No");
        assert!(v.get("factuality").is_none());
        assert!(v.get("selected_evidences").is_none());
    }

    #[test]
    fn facts_fall_back_to_text() {
        assert_eq!(Statement::whole("Sun is hot.").facts(), vec!["Sun is hot.".to_string()]);
        let split = Statement { text: "a and b".into(), splits: Some(vec!["a".into(), "b".into()]) };
        assert_eq!(split.facts().len(), 2);
        let empty = Statement { text: "c".into(), splits: Some(vec![]) };
        assert_eq!(empty.facts(), vec!["c".to_string()]);
    }

    #[test]
    fn lookup_term_prefers_word() {
        let def = ClaimEntry::new(Some("unicorn".into()), "mythical horse");
        assert_eq!(def.lookup_term(), "unicorn");
        let stmt = ClaimEntry::new(None, "The sun is a star.");
        assert_eq!(stmt.lookup_term(), "The sun is a star.");
    }
}
