// src/server.rs
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::{Settings, SplitterKind};
use crate::connector::ColonSentenceConnector;
use crate::entailment::{EntailmentClassifier, LlmEntailmentClassifier};
use crate::error::VerifyError;
use crate::llm::{Llm, LlmClient};
use crate::pipeline::{Pipeline, PipelineOptions, Stages};
use crate::progress::{stream_verification, ProgressPipeline, ProgressSink, StreamMessage};
use crate::retrieve::WikipediaEvidenceFetcher;
use crate::selection::{Bm25EvidenceSelector, EvidenceSelector};
use crate::splitter::{ClaimSplitter, LlmClaimSplitter, SentenceClaimSplitter};
use crate::translate::{LlmTranslator, Translator};
use crate::types::{ClaimEntry, VerificationResult};
use crate::verification::ModelStatementVerifier;
use crate::wiki::WikiClient;

/// Process-wide orchestrators, built once at startup and shared by handlers.
pub struct Engine {
    pub definitions: ProgressPipeline,
    pub statements: ProgressPipeline,
    pub classifier: Arc<dyn EntailmentClassifier>,
    pub default_lang: String,
    pub only_intro: bool,
}

impl Engine {
    pub fn from_settings(s: &Settings) -> anyhow::Result<Self> {
        let llm: Arc<dyn Llm> = Arc::new(LlmClient::new(
            s.openai_model.clone(),
            s.openai_base_url.clone(),
            s.openai_api_key.clone(),
            s.llm_concurrency,
        ));

        let classifier: Arc<dyn EntailmentClassifier> = {
            let (model, base_url, api_key, concurrency) =
                (s.openai_model.clone(), s.openai_base_url.clone(), s.openai_api_key.clone(), s.llm_concurrency);
            Arc::new(LlmEntailmentClassifier::new(format!("nli:{model}"), move || {
                if base_url.is_none() && api_key.is_none() && std::env::var_os("OPENAI_API_KEY").is_none() {
                    anyhow::bail!("no API key configured for the default OpenAI endpoint");
                }
                Ok(Arc::new(LlmClient::new(model.clone(), base_url.clone(), api_key.clone(), concurrency)) as Arc<dyn Llm>)
            }))
        };
        if let Err(e) = classifier.ensure_loaded() {
            warn!(error = %e, "classifier not loaded at startup, retrying on first request");
        }

        let selector = Arc::new(Bm25EvidenceSelector::new(s.top_k));
        selector.load()?;

        let wiki = WikiClient::new(s.wiki_api_url.clone(), s.wiki_qps, s.http_timeout_ms).context("building wiki client")?;
        let fetcher = Arc::new(WikipediaEvidenceFetcher::new(Arc::new(wiki), s.kb_lang.clone(), s.split_level, s.fetch_concurrency));
        let verifier = Arc::new(ModelStatementVerifier::new(classifier.clone(), &s.premise_order)?);
        let translator = s.translate.then(|| Arc::new(LlmTranslator::new(llm.clone())) as Arc<dyn Translator>);

        let splitter: Option<Arc<dyn ClaimSplitter>> = match s.splitter {
            SplitterKind::None => None,
            SplitterKind::Llm => Some(Arc::new(LlmClaimSplitter::new(llm.clone()))),
            SplitterKind::Sentence => Some(Arc::new(SentenceClaimSplitter)),
        };

        let definition_stages = Stages {
            translator,
            fetcher,
            connector: Arc::new(ColonSentenceConnector),
            splitter: None,
            selector,
            verifier,
        };
        let statement_stages = Stages { splitter, ..definition_stages.clone() };
        let options = PipelineOptions { pivot_lang: s.pivot_lang.clone(), per_atom_evidence: s.per_atom_evidence };

        info!(kb_lang = %s.kb_lang, premise_order = %s.premise_order, splitter = ?s.splitter, "engine ready");
        Ok(Self {
            definitions: ProgressPipeline::new(Arc::new(Pipeline::new(definition_stages, options.clone()))),
            statements: ProgressPipeline::new(Arc::new(Pipeline::new(statement_stages, options))),
            classifier,
            default_lang: s.default_lang.clone(),
            only_intro: s.only_intro,
        })
    }

    fn lang(&self, requested: Option<String>) -> String {
        requested.filter(|l| !l.trim().is_empty()).unwrap_or_else(|| self.default_lang.clone())
    }
}

#[derive(Debug, Deserialize)]
pub struct DefinitionReq {
    pub word: String,
    pub claim: String,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatementReq {
    pub claim: String,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    #[default]
    Definition,
    Statement,
}

#[derive(Debug, Deserialize)]
pub struct BatchReq {
    pub entries: Vec<ClaimEntry>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub only_intro: Option<bool>,
    #[serde(default)]
    pub mode: BatchMode,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResp {
    pub results: Vec<VerificationResult>,
}

/// Failure of a unary request, reported as `500 {"detail": ...}`.
pub struct ApiError(VerifyError);

impl From<VerifyError> for ApiError {
    fn from(e: VerifyError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(error = %self.0, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

pub async fn verify_definition(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<DefinitionReq>,
) -> Result<Json<VerificationResult>, ApiError> {
    let lang = engine.lang(req.lang);
    let res = engine.definitions.pipeline().verify(Some(req.word), req.claim, &lang, engine.only_intro).await?;
    Ok(Json(res))
}

pub async fn verify_statement(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<StatementReq>,
) -> Result<Json<VerificationResult>, ApiError> {
    let lang = engine.lang(req.lang);
    let res = engine.statements.pipeline().verify(None, req.claim, &lang, engine.only_intro).await?;
    Ok(Json(res))
}

pub async fn verify_batch(State(engine): State<Arc<Engine>>, Json(req): Json<BatchReq>) -> Result<Json<BatchResp>, ApiError> {
    let lang = engine.lang(req.lang);
    let pipeline = match req.mode {
        BatchMode::Definition => &engine.definitions,
        BatchMode::Statement => &engine.statements,
    };
    let only_intro = req.only_intro.unwrap_or(engine.only_intro);
    let results = pipeline.pipeline().verify_batch(&req.entries, &lang, only_intro).await?;
    Ok(Json(BatchResp { results }))
}

pub async fn health(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    Json(json!({ "healthy": true, "classifier_loaded": engine.classifier.is_loaded() }))
}

#[derive(Clone, Copy)]
enum StreamKind {
    Definition,
    Statement,
}

async fn definition_ws(State(engine): State<Arc<Engine>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| stream_socket(socket, engine, StreamKind::Definition))
}

async fn statement_ws(State(engine): State<Arc<Engine>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| stream_socket(socket, engine, StreamKind::Statement))
}

/// Parse the first text frame into `(word, claim, lang)`.
fn parse_stream_request(kind: StreamKind, text: &str) -> anyhow::Result<(Option<String>, String, Option<String>)> {
    Ok(match kind {
        StreamKind::Definition => {
            let req: DefinitionReq = serde_json::from_str(text)?;
            (Some(req.word), req.claim, req.lang)
        }
        StreamKind::Statement => {
            let req: StatementReq = serde_json::from_str(text)?;
            (None, req.claim, req.lang)
        }
    })
}

async fn stream_socket(socket: WebSocket, engine: Arc<Engine>, kind: StreamKind) {
    let (mut sender, mut receiver) = socket.split();

    let request = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => break parse_stream_request(kind, &text),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
            Some(Ok(_)) => continue,
        }
    };
    let (word, claim, lang) = match request {
        Ok(parsed) => parsed,
        Err(e) => {
            let msg = StreamMessage::Error { message: format!("invalid request: {e}") };
            if let Ok(text) = serde_json::to_string(&msg) {
                let _ = sender.send(Message::Text(text)).await;
            }
            let _ = sender.close().await;
            return;
        }
    };

    let pipeline = match kind {
        StreamKind::Definition => engine.definitions.clone(),
        StreamKind::Statement => engine.statements.clone(),
    };
    let lang = engine.lang(lang);
    let only_intro = engine.only_intro;
    let (sink, mut rx) = ProgressSink::channel();
    tokio::spawn(async move {
        stream_verification(&pipeline, word, claim, &lang, only_intro, sink).await;
    });

    while let Some(msg) = rx.recv().await {
        let terminal = msg.is_terminal();
        let text = match serde_json::to_string(&msg) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "unserializable stream message");
                break;
            }
        };
        if sender.send(Message::Text(text)).await.is_err() {
            debug!("websocket client disconnected");
            break;
        }
        if terminal {
            break;
        }
    }
    drop(rx);
    let _ = sender.close().await;
}

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/verify-definition", post(verify_definition))
        .route("/verify-statement", post(verify_statement))
        .route("/verify-batch", post(verify_batch))
        .route("/verify-definition/ws", get(definition_ws))
        .route("/verify-statement/ws", get(statement_ws))
        .route("/health", get(health))
        .with_state(engine)
}

pub async fn run_server(engine: Engine, addr: &str) -> anyhow::Result<()> {
    let app = router(Arc::new(engine));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
