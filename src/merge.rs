//! Ordered merge of chapter segments into the final artifact
//!
//! Stage 1 joins the segments with the audio tool's concat demuxer and
//! stream copy, so the lossless audio is never re-encoded. Stage 2 runs only
//! for compressed output and transcodes the single merged file. Neither
//! stage is retried; on failure whatever was written is left in place.

use crate::config::OutputFormat;
use crate::error::{MergeError, ProcessError};
use crate::process::{Executable, ProcessRunner, ProcessSpec};
use crate::types::{Event, MergePlan};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Default wall-clock limit for each merge stage
pub const DEFAULT_MERGE_TIMEOUT: Duration = Duration::from_secs(600);

/// Quality used when a compressed plan does not set one
const DEFAULT_QUALITY: u8 = 0;

/// Concatenates segments and optionally transcodes the result
pub struct AudioMerger {
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl AudioMerger {
    /// Merger whose stages each get `timeout`
    pub fn new(runner: Arc<dyn ProcessRunner>, timeout: Duration) -> Self {
        Self {
            runner,
            timeout,
            event_tx: None,
        }
    }

    /// Publish stage events on this channel
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }

    /// Produce the plan's destination file
    ///
    /// Segments are joined in exactly the order given. A missing or
    /// unreadable segment fails the concat stage; nothing is skipped.
    pub async fn merge(&self, plan: &MergePlan) -> Result<PathBuf, MergeError> {
        if plan.ordered_segments.is_empty() {
            return Err(MergeError::NoSegments);
        }

        let lossless = plan.lossless_path();
        if plan.output_format == OutputFormat::Compressed && lossless == plan.destination {
            return Err(MergeError::Transcode {
                reason: format!(
                    "destination {} is also the lossless intermediate",
                    plan.destination.display()
                ),
            });
        }

        let segments = resolve_segments(&plan.ordered_segments).await?;

        self.emit(Event::Merging {
            segments: segments.len(),
        });
        tracing::info!(
            segments = segments.len(),
            output = %lossless.display(),
            "concatenating segments"
        );
        self.concat(&segments, &lossless).await?;

        if plan.output_format == OutputFormat::Compressed {
            let quality = plan.quality.unwrap_or(DEFAULT_QUALITY);
            self.emit(Event::Transcoding {
                input: lossless.clone(),
            });
            tracing::info!(
                input = %lossless.display(),
                output = %plan.destination.display(),
                quality,
                "transcoding merged track"
            );
            self.transcode(&lossless, &plan.destination, quality).await?;

            if !plan.keep_intermediate {
                remove_quietly(&lossless).await;
            }
        }

        if !plan.keep_segments {
            for segment in &plan.ordered_segments {
                remove_quietly(segment).await;
            }
        }

        Ok(plan.destination.clone())
    }

    async fn concat(&self, segments: &[PathBuf], output: &Path) -> Result<(), MergeError> {
        let concat_failed = |reason: String| MergeError::Concat { reason };

        let dir = parent_dir(output);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| concat_failed(format!("cannot create {}: {e}", dir.display())))?;

        let list = write_concat_list(&dir, segments)
            .map_err(|e| concat_failed(format!("cannot write concat list: {e}")))?;

        let spec = concat_spec(list.path(), output, self.timeout)
            .map_err(|e| concat_failed(e.to_string()))?;
        self.runner
            .run(&spec)
            .await
            .map_err(|e| concat_failed(e.to_string()))?;

        verify_nonempty(output)
            .await
            .map_err(|e| concat_failed(e.to_string()))
    }

    async fn transcode(&self, input: &Path, output: &Path, quality: u8) -> Result<(), MergeError> {
        let transcode_failed = |reason: String| MergeError::Transcode { reason };

        let spec = transcode_spec(input, output, quality, self.timeout)
            .map_err(|e| transcode_failed(e.to_string()))?;
        self.runner
            .run(&spec)
            .await
            .map_err(|e| transcode_failed(e.to_string()))?;

        verify_nonempty(output)
            .await
            .map_err(|e| transcode_failed(e.to_string()))
    }
}

/// `ffmpeg -f concat -safe 0 -i <list> -c copy -y <output>`
fn concat_spec(list: &Path, output: &Path, timeout: Duration) -> Result<ProcessSpec, ProcessError> {
    ProcessSpec::new(Executable::AudioTool, timeout)
        .arg("-f")?
        .arg("concat")?
        .arg("-safe")?
        .arg("0")?
        .arg("-i")?
        .path_arg(list)?
        .arg("-c")?
        .arg("copy")?
        .arg("-y")?
        .path_arg(output)
}

/// `ffmpeg -i <input> -q:a <quality> -y <output>`
fn transcode_spec(
    input: &Path,
    output: &Path,
    quality: u8,
    timeout: Duration,
) -> Result<ProcessSpec, ProcessError> {
    ProcessSpec::new(Executable::AudioTool, timeout)
        .arg("-i")?
        .path_arg(input)?
        .arg("-q:a")?
        .arg(quality.to_string())?
        .arg("-y")?
        .path_arg(output)
}

/// One concat-demuxer line; single quotes are closed, escaped and reopened
pub(crate) fn concat_list_entry(path: &Path) -> String {
    format!("file '{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

fn write_concat_list(dir: &Path, segments: &[PathBuf]) -> std::io::Result<tempfile::NamedTempFile> {
    let mut list = tempfile::Builder::new()
        .prefix(".concat-")
        .suffix(".txt")
        .tempfile_in(dir)?;
    for segment in segments {
        writeln!(list, "{}", concat_list_entry(segment))?;
    }
    list.flush()?;
    Ok(list)
}

/// Absolute paths of every segment, failing on the first missing one
async fn resolve_segments(segments: &[PathBuf]) -> Result<Vec<PathBuf>, MergeError> {
    let mut resolved = Vec::with_capacity(segments.len());
    for segment in segments {
        let path = tokio::fs::canonicalize(segment)
            .await
            .map_err(|e| MergeError::Concat {
                reason: format!("segment {} is unreadable: {e}", segment.display()),
            })?;
        if !tokio::fs::metadata(&path)
            .await
            .is_ok_and(|m| m.is_file())
        {
            return Err(MergeError::Concat {
                reason: format!("segment {} is not a file", segment.display()),
            });
        }
        resolved.push(path);
    }
    Ok(resolved)
}

async fn verify_nonempty(path: &Path) -> Result<(), ProcessError> {
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() && m.len() > 0 => Ok(()),
        _ => Err(ProcessError::MissingOutput {
            path: path.to_path_buf(),
        }),
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove intermediate file");
    }
}
