use anyhow::{Context, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionRequestMessage, CreateChatCompletionRequestArgs},
    Client,
};
use futures::{stream, StreamExt};
use tracing::debug;

use super::Llm;

#[derive(Clone)]
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_concurrency: usize,
}

impl LlmClient {
    pub fn new(model: String, base_url: Option<String>, api_key: Option<String>, max_concurrency: usize) -> Self {
        let mut cfg = OpenAIConfig::default();
        if let Some(url) = base_url { cfg = cfg.with_api_base(url); }
        if let Some(key) = api_key { cfg = cfg.with_api_key(key); }
        let client = Client::with_config(cfg);
        Self { client, model, temperature: 0.3, max_concurrency: max_concurrency.max(1) }
    }

    async fn complete_all(&self, prompts: Vec<Vec<ChatCompletionRequestMessage>>) -> Result<Vec<String>> {
        let n = prompts.len();
        debug!(model = %self.model, prompts = n, "chat completions");
        let reqs = prompts.into_iter().enumerate().map(|(idx, messages)| {
            let client = self.client.clone();
            let model = self.model.clone();
            let temperature = self.temperature;
            async move {
                let req = CreateChatCompletionRequestArgs::default()
                    .model(model)
                    .temperature(temperature)
                    .messages(messages)
                    .build()?;
                let resp = client.chat().create(req).await?;
                let text = resp
                    .choices
                    .first()
                    .and_then(|c| c.message.content.clone())
                    .context("chat completion returned no content")?;
                Ok::<_, anyhow::Error>((idx, text))
            }
        });

        // completions arrive out of order; slot them back by prompt index
        let mut texts = vec![String::new(); n];
        let mut done = stream::iter(reqs).buffer_unordered(self.max_concurrency);
        while let Some(res) = done.next().await {
            let (idx, text) = res?;
            texts[idx] = text;
        }
        Ok(texts)
    }
}

#[async_trait::async_trait]
impl Llm for LlmClient {
    async fn chat_many(&self, prompts: Vec<Vec<ChatCompletionRequestMessage>>) -> Result<Vec<String>> {
        self.complete_all(prompts).await
    }
}
