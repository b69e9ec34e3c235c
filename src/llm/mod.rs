use anyhow::Result;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs,
};

pub mod openai;

pub use openai::LlmClient;

#[async_trait::async_trait]
pub trait Llm: Send + Sync {
    /// One completion per prompt, in prompt order.
    async fn chat_many(&self, prompts: Vec<Vec<ChatCompletionRequestMessage>>) -> Result<Vec<String>>;
}

/// System + user message pair.
pub fn prompt(system: &str, user: String) -> Result<Vec<ChatCompletionRequestMessage>> {
    let sys = ChatCompletionRequestSystemMessageArgs::default()
        .content(system)
        .build()?
        .into();
    let usr = ChatCompletionRequestUserMessageArgs::default()
        .content(user)
        .build()?
        .into();
    Ok(vec![sys, usr])
}

/// Strip Markdown code fences some models wrap around JSON replies.
pub fn extract_json_block(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
