pub mod config;
pub mod connector;
pub mod entailment;
pub mod error;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod retrieve;
pub mod scoring;
pub mod segments;
pub mod selection;
pub mod server;
pub mod splitter;
pub mod translate;
pub mod types;
pub mod verification;
pub mod wiki;

pub use error::{Result, VerifyError};
pub use pipeline::{Pipeline, PipelineOptions, Stages};
pub use progress::{ProgressPipeline, ProgressSink, ProgressStage, StreamMessage};

#[cfg(test)]
mod tests;
