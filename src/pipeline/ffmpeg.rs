use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{TransformOptions, TransformOutput, TransformPipeline};

const AUDIO_CODEC: &str = "mp3";
const AUDIO_BITRATE: &str = "192k";
const AUDIO_SAMPLE_RATE: &str = "44100";

/// Extracts the audio track of a video file into an mp3 under `output_dir`
/// by shelling out to ffmpeg. The child process is killed if the future is
/// dropped, so a dispatcher timeout does not leave a stray encoder running.
pub struct AudioExtractPipeline {
    output_dir: PathBuf,
}

impl AudioExtractPipeline {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    fn output_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.mp3", Uuid::new_v4()))
    }

    async fn run_ffmpeg(&self, input: &Path, output: &Path) -> Result<()> {
        let mut command = Command::new("ffmpeg");
        command
            .args(extraction_args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running ffmpeg for {:?}", input);
        let result = command
            .output()
            .await
            .context("failed to spawn ffmpeg, is it installed?")?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(anyhow!(
                "ffmpeg exited with {}: {}",
                result.status,
                stderr.trim().lines().last().unwrap_or("no output")
            ));
        }
        Ok(())
    }

    /// Best-effort duration probe; a missing ffprobe just means no duration.
    async fn probe_duration(&self, path: &Path) -> Option<f64> {
        let result = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .ok()?;

        if !result.status.success() {
            return None;
        }
        String::from_utf8_lossy(&result.stdout).trim().parse().ok()
    }
}

fn extraction_args(input: &Path, output: &Path) -> Vec<std::ffi::OsString> {
    vec![
        "-i".into(),
        input.as_os_str().to_owned(),
        "-vn".into(),
        "-acodec".into(),
        AUDIO_CODEC.into(),
        "-ab".into(),
        AUDIO_BITRATE.into(),
        "-ar".into(),
        AUDIO_SAMPLE_RATE.into(),
        "-y".into(),
        output.as_os_str().to_owned(),
    ]
}

#[async_trait]
impl TransformPipeline for AudioExtractPipeline {
    async fn transform(&self, input: &Path, options: &TransformOptions) -> Result<TransformOutput> {
        if let Some(lang) = &options.language {
            debug!("Language hint {} ignored by audio extraction", lang);
        }

        let output = self.output_path();
        if let Err(e) = self.run_ffmpeg(input, &output).await {
            // a failed run can leave a partial output behind
            if output.exists() {
                if let Err(remove_err) = std::fs::remove_file(&output) {
                    warn!("Failed to remove partial output {:?}: {}", output, remove_err);
                }
            }
            return Err(e);
        }

        if !output.is_file() {
            return Err(anyhow!("ffmpeg reported success but produced no output"));
        }

        let duration_secs = self.probe_duration(&output).await;
        info!(
            "Extracted audio from {:?} to {:?} ({:?}s)",
            input, output, duration_secs
        );

        Ok(TransformOutput {
            text: None,
            detected_language: None,
            duration_secs,
            artifact: Some(output),
            media_kind: "audio",
        })
    }
}
