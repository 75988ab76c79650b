use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

pub mod ffmpeg;

pub use ffmpeg::AudioExtractPipeline;

/// Options forwarded from the submission, opaque to the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    pub language: Option<String>,
}

/// What a transform run produced: inline data and/or a downloadable file.
/// The artifact path, if present, points at a finalized file the pipeline
/// hands off to the caller; everything else the pipeline touched has been
/// cleaned up by the time this is returned.
#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    pub text: Option<String>,
    pub detected_language: Option<String>,
    pub duration_secs: Option<f64>,
    pub artifact: Option<PathBuf>,
    pub media_kind: &'static str,
}

/// The long-running external transform. Implementations may block for seconds
/// to minutes, must be safe to call from a worker task, must not mutate
/// global state, and must remove their own scratch files on every exit path
/// except the declared output artifact.
#[async_trait]
pub trait TransformPipeline: Send + Sync {
    async fn transform(&self, input: &Path, options: &TransformOptions) -> Result<TransformOutput>;
}
