//! Chapter-to-segment conversion through the speech tool

use crate::error::{ConversionError, ProcessError};
use crate::process::{Executable, ProcessRunner, ProcessSpec, Voice};
use crate::retry::{RetryConfig, with_retry};
use crate::types::{Chapter, Segment};
use crate::utils::segment_file_name;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default wall-clock limit for one synthesis call
pub const DEFAULT_CONVERSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Turns one chapter into one lossless audio segment
///
/// Implementations apply their own retry policy and only return an error
/// once the chapter has permanently failed.
#[async_trait]
pub trait ChapterConverter: Send + Sync {
    /// Convert a chapter, returning the segment file on success
    async fn convert(&self, chapter: &Chapter) -> Result<Segment, ConversionError>;
}

/// Converter that drives the speech-synthesis executable
///
/// Chapter text is written to a temporary file and passed with `-f`; the
/// segment goes to `chapter-NNNN.aiff` in the output directory. Every attempt
/// for a chapter writes the same path.
///
/// # Examples
///
/// ```no_run
/// use epub2audio::converter::{ChapterConverter, CliChapterConverter};
/// use epub2audio::process::SecureProcessRunner;
/// use epub2audio::types::Chapter;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let converter = CliChapterConverter::new(Arc::new(SecureProcessRunner::new()), "/tmp/chapters")
///     .with_voice("Zoe (Enhanced)")?;
/// let segment = converter.convert(&Chapter::new(0, "It was a dark and stormy night.")).await?;
/// println!("{}", segment.path.display());
/// # Ok(())
/// # }
/// ```
pub struct CliChapterConverter {
    runner: Arc<dyn ProcessRunner>,
    voice: Option<Voice>,
    output_dir: PathBuf,
    retry: RetryConfig,
    timeout: Duration,
}

impl CliChapterConverter {
    /// Converter writing segments into `output_dir` with the tool's default voice
    pub fn new(runner: Arc<dyn ProcessRunner>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            voice: None,
            output_dir: output_dir.into(),
            retry: RetryConfig::default(),
            timeout: DEFAULT_CONVERSION_TIMEOUT,
        }
    }

    /// Use a specific voice
    ///
    /// The name is validated here, before any chapter runs, so a bad voice
    /// never consumes a retry.
    pub fn with_voice(mut self, voice: &str) -> Result<Self, ProcessError> {
        let voice = Voice::parse(voice).map_err(|violation| ProcessError::InvalidArgument {
            argument: voice.escape_debug().to_string(),
            violation,
        })?;
        self.voice = Some(voice);
        Ok(self)
    }

    /// Use an already validated voice (or the default voice for `None`)
    pub fn with_parsed_voice(mut self, voice: Option<Voice>) -> Self {
        self.voice = voice;
        self
    }

    /// Set retry bounds
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory segments are written to
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Segment path for a chapter index
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(segment_file_name(index))
    }

    fn build_spec(&self, input: &Path, output: &Path) -> Result<ProcessSpec, ProcessError> {
        let mut spec = ProcessSpec::new(Executable::SpeechSynth, self.timeout)
            .arg("-f")?
            .path_arg(input)?
            .arg("-o")?
            .path_arg(output)?;
        if let Some(voice) = &self.voice {
            spec = spec.arg("-v")?.arg(voice.as_str())?;
        }
        Ok(spec)
    }
}

#[async_trait]
impl ChapterConverter for CliChapterConverter {
    async fn convert(&self, chapter: &Chapter) -> Result<Segment, ConversionError> {
        let index = chapter.index;
        let output = self.segment_path(index);
        let rejected = |cause| ConversionError {
            chapter_index: index,
            attempts: 0,
            cause,
        };

        let input = write_text_input(&chapter.text).await.map_err(rejected)?;
        let spec = self.build_spec(input.path(), &output).map_err(rejected)?;

        let (result, attempts) = with_retry(&self.retry, |attempt| {
            let spec = &spec;
            let output = &output;
            async move {
                tracing::debug!(chapter = index, attempt, "synthesizing chapter");
                self.runner.run(spec).await?;
                verify_output(output).await
            }
        })
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(chapter = index, attempts, path = %output.display(), "chapter converted");
                Ok(Segment {
                    path: output,
                    attempts,
                })
            }
            Err(cause) => {
                remove_partial(&output).await;
                Err(ConversionError {
                    chapter_index: index,
                    attempts,
                    cause,
                })
            }
        }
    }
}

/// Write chapter text to a temporary file removed on drop
async fn write_text_input(text: &str) -> Result<tempfile::NamedTempFile, ProcessError> {
    let file = tempfile::Builder::new()
        .prefix("epub2audio-")
        .suffix(".txt")
        .tempfile()
        .map_err(|e| ProcessError::io("failed to create chapter text file", e))?;
    tokio::fs::write(file.path(), text)
        .await
        .map_err(|e| ProcessError::io("failed to write chapter text file", e))?;
    Ok(file)
}

/// A zero exit only counts if a non-empty segment exists
async fn verify_output(path: &Path) -> Result<(), ProcessError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() && metadata.len() > 0 => Ok(()),
        _ => Err(ProcessError::MissingOutput {
            path: path.to_path_buf(),
        }),
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial segment"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove partial segment"),
    }
}
