use unicode_segmentation::UnicodeSegmentation;

pub fn segment_sentences(text: &str) -> Vec<String> {
    text.unicode_sentences()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Lowercased word tokens, used for lexical ranking.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SplitLevel {
    Sentence,
    Passage,
}

const PASSAGE_SENTENCES: usize = 3;

/// Split page text into evidence lines at the given granularity.
pub fn split_lines(text: &str, level: SplitLevel) -> Vec<String> {
    let sentences = segment_sentences(text);
    match level {
        SplitLevel::Sentence => sentences,
        SplitLevel::Passage => sentences
            .chunks(PASSAGE_SENTENCES)
            .map(|chunk| chunk.join(" "))
            .collect(),
    }
}

/// Variants of `term` with the first letter of each word lower/upper cased,
/// original spelling first. Long terms only get the term and its capitalised form.
pub fn case_variants(term: &str) -> Vec<String> {
    const MAX_WORDS: usize = 4;
    let words: Vec<&str> = term.split_whitespace().collect();
    let mut out = vec![term.trim().to_string()];
    if words.is_empty() {
        return out;
    }

    if words.len() > MAX_WORDS {
        out.push(capitalize(term.trim()));
    } else {
        for mask in 0..(1u32 << words.len()) {
            let variant = words
                .iter()
                .enumerate()
                .map(|(i, w)| if mask & (1 << i) != 0 { capitalize(w) } else { decapitalize(w) })
                .collect::<Vec<_>>()
                .join(" ");
            out.push(variant);
        }
    }

    let mut seen = std::collections::HashSet::new();
    out.retain(|v| seen.insert(v.clone()));
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn decapitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_basic_unicode() {
        let txt = "Hello world.  Καλημέρα κόσμε!  你好。";
        let s = segment_sentences(txt);
        assert!(s.len() >= 3);
        assert_eq!(s[0], "Hello world.");
    }

    #[test]
    fn passages_group_three_sentences() {
        let txt = "One. Two. Three. Four.";
        let lines = split_lines(txt, SplitLevel::Passage);
        assert_eq!(lines, vec!["One. Two. Three.".to_string(), "Four.".to_string()]);
        assert_eq!(split_lines(txt, SplitLevel::Sentence).len(), 4);
    }

    #[test]
    fn case_variants_cover_first_letters() {
        let v = case_variants("printed circuit");
        assert_eq!(v[0], "printed circuit");
        assert!(v.contains(&"Printed circuit".to_string()));
        assert!(v.contains(&"printed Circuit".to_string()));
        assert!(v.contains(&"Printed Circuit".to_string()));
        assert_eq!(v.len(), 4);
    }

    #[test]
    fn long_terms_only_capitalised() {
        let v = case_variants("a very long multi word term");
        assert_eq!(v, vec!["a very long multi word term".to_string(), "A very long multi word term".to_string()]);
    }

    #[test]
    fn tokenize_lowercases_words() {
        assert_eq!(tokenize("The Horn, a horse!"), vec!["the", "horn", "a", "horse"]);
    }
}
