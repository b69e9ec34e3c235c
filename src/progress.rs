//! Single-claim verification with progress notifications.
//!
//! Stages run strictly in sequence. Each model-backed stage call runs on the
//! blocking pool and is awaited, so a stage that computes synchronously never
//! holds a runtime worker and the progress consumer keeps draining while it
//! works. A detached consumer only silences notifications; work already
//! offloaded runs to completion and its result is discarded.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, Stage, VerifyError};
use crate::pipeline::{connector_input, fetch_requests, Pipeline};
use crate::types::{ClaimEntry, Statement, VerificationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgressStage {
    StartingVerification,
    Translating,
    FetchingEvidence,
    NoEvidenceFound,
    ProcessingClaim,
    SplittingClaim,
    SelectingEvidence,
    VerifyingStatement,
    VerificationComplete,
}

impl ProgressStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStage::StartingVerification => "startingVerification",
            ProgressStage::Translating => "translating",
            ProgressStage::FetchingEvidence => "fetchingEvidence",
            ProgressStage::NoEvidenceFound => "noEvidenceFound",
            ProgressStage::ProcessingClaim => "processingClaim",
            ProgressStage::SplittingClaim => "splittingClaim",
            ProgressStage::SelectingEvidence => "selectingEvidence",
            ProgressStage::VerifyingStatement => "verifyingStatement",
            ProgressStage::VerificationComplete => "verificationComplete",
        }
    }
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message on a verification stream. A stream carries any number of
/// `Progress` messages followed by exactly one `Result` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    Progress { message: ProgressStage },
    Result { data: VerificationResult },
    Error { message: String },
}

impl StreamMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamMessage::Progress { .. })
    }
}

/// Sending half of a verification stream. Sends to a closed channel are
/// dropped without error.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<StreamMessage>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink nobody listens to.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn is_attached(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn progress(&self, stage: ProgressStage) {
        self.send(StreamMessage::Progress { message: stage });
    }

    pub fn send(&self, msg: StreamMessage) {
        let Some(tx) = &self.tx else { return };
        if tx.is_closed() {
            debug!(?msg, "stream consumer gone, dropping message");
            return;
        }
        // the receiver may close between the check and the send
        let _ = tx.send(msg);
    }
}

/// Streaming front of a [`Pipeline`] for one claim at a time.
#[derive(Clone)]
pub struct ProgressPipeline {
    pipeline: Arc<Pipeline>,
}

impl ProgressPipeline {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Drive `job` to completion on a blocking-pool thread and wait for it.
    async fn offload<T, F, Fut>(&self, stage: Stage, job: F) -> Result<T>
    where
        F: FnOnce(Arc<Pipeline>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let fut = job(self.pipeline.clone());
        let handle = Handle::current();
        tokio::task::spawn_blocking(move || handle.block_on(fut))
            .await
            .map_err(|e| VerifyError::Join(format!("{stage}: {e}")))?
            .map_err(|e| VerifyError::stage(stage, e))
    }

    pub async fn verify(
        &self,
        word: Option<String>,
        claim: String,
        lang: &str,
        only_intro: bool,
        sink: &ProgressSink,
    ) -> Result<VerificationResult> {
        let source = ClaimEntry::new(word, claim);
        sink.progress(ProgressStage::StartingVerification);

        let translation = if self.pipeline.needs_translation(lang) {
            sink.progress(ProgressStage::Translating);
            let (entry, lang) = (source.clone(), lang.to_string());
            self.offload(Stage::Translate, move |p| async move {
                let mut out = p.translate(std::slice::from_ref(&entry), &lang).await?;
                out.pop().ok_or_else(|| anyhow::anyhow!("translator returned no entry"))
            })
            .await?
        } else {
            source.clone()
        };

        sink.progress(ProgressStage::FetchingEvidence);
        let request = fetch_requests(std::slice::from_ref(&source), std::slice::from_ref(&translation));
        let (words, evidences) = self
            .pipeline
            .stages()
            .fetcher
            .fetch_evidences_batch(&request, only_intro, lang)
            .await
            .map_err(|e| VerifyError::stage(Stage::Fetch, e))?;

        let (Some(word), Some(pages)) = (words.into_iter().next(), evidences.into_iter().next().filter(|p| !p.is_empty()))
        else {
            sink.progress(ProgressStage::NoEvidenceFound);
            debug!(claim = %source.text, "no evidence found");
            return Ok(VerificationResult::not_in_wiki(source.word, source.text));
        };

        sink.progress(ProgressStage::ProcessingClaim);
        let input = connector_input(&source, translation, word);
        let connected = self
            .offload(Stage::Connect, move |p| async move {
                let mut out = p.connect(std::slice::from_ref(&input)).await?;
                out.pop().ok_or_else(|| anyhow::anyhow!("sentence connector returned no entry"))
            })
            .await?;

        let statement = if self.pipeline.stages().splitter.is_some() {
            sink.progress(ProgressStage::SplittingClaim);
            self.offload(Stage::Split, move |p| async move {
                let mut out = p.split(std::slice::from_ref(&connected)).await?;
                out.pop().ok_or_else(|| anyhow::anyhow!("claim splitter returned no statement"))
            })
            .await?
        } else {
            Statement::whole(connected.text)
        };

        sink.progress(ProgressStage::SelectingEvidence);
        let selection = {
            let (statement, pages) = (statement.clone(), pages);
            self.offload(Stage::Select, move |p| async move { p.select(&[statement], &[pages]).await })
                .await?
        };

        sink.progress(ProgressStage::VerifyingStatement);
        let (verdict, selected) = self
            .offload(Stage::Verify, move |p| async move {
                let mut out = p.judge(std::slice::from_ref(&statement), selection).await?;
                out.pop().ok_or_else(|| anyhow::anyhow!("verifier returned no verdict"))
            })
            .await?;

        sink.progress(ProgressStage::VerificationComplete);
        Ok(VerificationResult::verified(source.word, source.text, verdict, selected))
    }
}

/// Run one streaming verification and finish the stream with its terminal
/// message.
pub async fn stream_verification(
    pipeline: &ProgressPipeline,
    word: Option<String>,
    claim: String,
    lang: &str,
    only_intro: bool,
    sink: ProgressSink,
) {
    let msg = match pipeline.verify(word, claim, lang, only_intro, &sink).await {
        Ok(data) => StreamMessage::Result { data },
        Err(e) => {
            warn!(error = %e, "streaming verification failed");
            StreamMessage::Error { message: e.to_string() }
        }
    };
    sink.send(msg);
}
