use clap::{Args, ValueEnum};

use crate::segments::SplitLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SplitterKind {
    None,
    Llm,
    Sentence,
}

/// Runtime settings shared by every subcommand. Each flag can also come from
/// a `FACTVERIFY_*` environment variable.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Premise sentence order: reverse, top_last or keep
    #[arg(long, env = "FACTVERIFY_PREMISE_ORDER", default_value = "top_last")]
    pub premise_order: String,

    /// Use only the introduction of each knowledge-base page
    #[arg(long, env = "FACTVERIFY_ONLY_INTRO", default_value_t = true, action = clap::ArgAction::Set)]
    pub only_intro: bool,

    /// Language the claim-processing stages work in
    #[arg(long, env = "FACTVERIFY_PIVOT_LANG", default_value = "en")]
    pub pivot_lang: String,

    /// Request language when a request names none
    #[arg(long, env = "FACTVERIFY_DEFAULT_LANG", default_value = "en")]
    pub default_lang: String,

    /// Knowledge-base language
    #[arg(long, env = "FACTVERIFY_KB_LANG", default_value = "en")]
    pub kb_lang: String,

    #[arg(long, env = "FACTVERIFY_SPLIT_LEVEL", value_enum, default_value_t = SplitLevel::Sentence)]
    pub split_level: SplitLevel,

    /// MediaWiki API endpoint; `{lang}` is replaced by the knowledge-base language
    #[arg(long, env = "FACTVERIFY_WIKI_API_URL", default_value = "https://{lang}.wikipedia.org/w/api.php")]
    pub wiki_api_url: String,

    #[arg(long, env = "FACTVERIFY_WIKI_QPS", default_value_t = 10)]
    pub wiki_qps: u32,

    #[arg(long, env = "FACTVERIFY_HTTP_TIMEOUT_MS", default_value_t = 10_000)]
    pub http_timeout_ms: u64,

    #[arg(long, env = "FACTVERIFY_FETCH_CONCURRENCY", default_value_t = 8)]
    pub fetch_concurrency: usize,

    /// Evidence lines kept per statement (or per atom)
    #[arg(long, env = "FACTVERIFY_TOP_K", default_value_t = 5)]
    pub top_k: usize,

    /// Select evidence for each atomic fact separately
    #[arg(long, env = "FACTVERIFY_PER_ATOM_EVIDENCE")]
    pub per_atom_evidence: bool,

    /// Claim splitter for statement verification
    #[arg(long, env = "FACTVERIFY_SPLITTER", value_enum, default_value_t = SplitterKind::Llm)]
    pub splitter: SplitterKind,

    /// Translate non-pivot requests before processing
    #[arg(long, env = "FACTVERIFY_TRANSLATE", default_value_t = true, action = clap::ArgAction::Set)]
    pub translate: bool,

    #[arg(long, env = "FACTVERIFY_OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub openai_model: String,

    #[arg(long, env = "FACTVERIFY_OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "FACTVERIFY_LLM_CONCURRENCY", default_value_t = 16)]
    pub llm_concurrency: usize,

    #[arg(long, env = "FACTVERIFY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn defaults_parse() {
        let s = Cli::parse_from(["factverify"]).settings;
        assert_eq!(s.premise_order, "top_last");
        assert!(s.only_intro);
        assert_eq!(s.split_level, SplitLevel::Sentence);
        assert_eq!(s.splitter, SplitterKind::Llm);
        assert_eq!(s.top_k, 5);
    }

    #[test]
    fn flags_override() {
        let s = Cli::parse_from([
            "factverify",
            "--only-intro",
            "false",
            "--split-level",
            "passage",
            "--splitter",
            "sentence",
            "--per-atom-evidence",
            "--premise-order",
            "keep",
        ])
        .settings;
        assert!(!s.only_intro);
        assert_eq!(s.split_level, SplitLevel::Passage);
        assert_eq!(s.splitter, SplitterKind::Sentence);
        assert!(s.per_atom_evidence);
        assert_eq!(s.premise_order, "keep");
    }
}
