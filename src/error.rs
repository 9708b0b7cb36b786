//! Error types for epub2audio
//!
//! This module provides the error taxonomy for the conversion pipeline:
//! - Configuration errors, reported before any worker starts
//! - Process errors from the sandboxed runner (classified retryable or not)
//! - Per-chapter conversion errors after retries are exhausted
//! - Merge/transcode errors, always fatal to the run
//! - A threshold abort, surfaced distinctly from a crash

use crate::process::Executable;
use crate::types::PipelineResult;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for epub2audio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for epub2audio
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "failure_threshold")
        key: Option<String>,
    },

    /// A sandboxed process could not be prepared or run
    #[error("process error: {0}")]
    Process(#[from] ProcessError),

    /// A chapter could not be converted
    ///
    /// The pipeline reports per-chapter failures inside [`PipelineResult`]
    /// and never returns this. It lets callers that drive a
    /// [`crate::ChapterConverter`] directly use `?` in a crate [`Result`].
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Merging or transcoding the converted segments failed
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    /// The input is not a usable EPUB
    #[error("invalid EPUB: {0}")]
    InvalidEpub(String),

    /// No chapters were supplied to the pipeline
    #[error("no chapters to convert")]
    NoChapters,

    /// The failure threshold was exceeded and the run stopped early
    #[error(
        "run aborted: {} of {} chapters failed, exceeding the failure threshold",
        .0.failed.len(),
        .0.total_chapters
    )]
    Aborted(Box<PipelineResult>),

    /// Every chapter failed, so there is nothing to merge
    #[error("all {} chapters failed to convert", .0.total_chapters)]
    NoSegments(Box<PipelineResult>),

    /// A required external tool is not installed
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// The pipeline result attached to an abort or all-failed error, if any
    pub fn pipeline_result(&self) -> Option<&PipelineResult> {
        match self {
            Error::Aborted(result) | Error::NoSegments(result) => Some(result),
            _ => None,
        }
    }
}

/// Reason an argument was refused before reaching process execution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentViolation {
    /// Argument contains a character that is never allowed
    #[error("invalid character {0:?}")]
    ForbiddenCharacter(char),

    /// Argument is longer than the allowed maximum
    #[error("argument too long: {len} characters (max: {max})")]
    TooLong {
        /// Length of the rejected argument in characters
        len: usize,
        /// Maximum permitted length
        max: usize,
    },

    /// Argument looks like a flag the executable is not allowed to receive
    #[error("flag {0} is not allowed")]
    DisallowedFlag(String),

    /// More arguments than the executable's limit
    #[error("too many arguments: {count} (max: {max})")]
    TooManyArguments {
        /// Number of arguments supplied
        count: usize,
        /// Maximum permitted number of arguments
        max: usize,
    },

    /// Voice name contains a path component
    #[error("path components are not allowed in a voice name")]
    PathComponent,

    /// Voice name has unbalanced parentheses
    #[error("unbalanced parentheses")]
    UnbalancedParentheses,

    /// Argument is empty where a value is required
    #[error("empty value")]
    Empty,

    /// Path is not valid Unicode and cannot be checked
    #[error("path is not valid Unicode")]
    NotUnicode,
}

/// Errors from the sandboxed process runner
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Executable name is not on the fixed whitelist
    #[error("executable {name:?} is not allowed")]
    DisallowedExecutable {
        /// The rejected executable name
        name: String,
    },

    /// An argument failed validation
    #[error("invalid argument {argument:?}: {violation}")]
    InvalidArgument {
        /// The rejected argument, with control characters escaped
        argument: String,
        /// Why it was rejected
        violation: ArgumentViolation,
    },

    /// Whitelisted executable could not be located
    #[error("{executable} not found in search path")]
    NotFound {
        /// The executable that could not be resolved
        executable: Executable,
    },

    /// I/O failure while preparing, spawning or waiting on a process
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted
        context: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Process exceeded its wall-clock limit and was killed
    #[error("{executable} timed out after {timeout:?}")]
    Timeout {
        /// The executable that timed out
        executable: Executable,
        /// The limit that was exceeded
        timeout: Duration,
    },

    /// Process exited unsuccessfully
    #[error("{executable} exited with {}: {stderr_tail}", exit_label(.exit_code))]
    ProcessFailed {
        /// Exit code, `None` when terminated by a signal
        exit_code: Option<i32>,
        /// The executable that failed
        executable: Executable,
        /// Last lines of standard error
        stderr_tail: String,
    },

    /// Process reported success but produced no usable output file
    #[error("no output produced at {path}")]
    MissingOutput {
        /// The expected output file
        path: PathBuf,
    },

    /// The task running the process stopped before finishing
    #[error("interrupted: {0}")]
    Interrupted(String),
}

fn exit_label<C: std::borrow::Borrow<Option<i32>>>(code: C) -> String {
    match code.borrow() {
        Some(c) => format!("code {c}"),
        None => "a signal".to_string(),
    }
}

impl ProcessError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ProcessError::Io {
            context: context.into(),
            source,
        }
    }
}

/// A chapter that could not be converted, after any retries
#[derive(Debug, Error)]
#[error("chapter {chapter_index} failed after {attempts} attempt(s): {cause}")]
pub struct ConversionError {
    /// Zero-based index of the chapter
    pub chapter_index: usize,
    /// Number of synthesis attempts made (0 when rejected before running)
    pub attempts: u32,
    /// The last failure observed
    #[source]
    pub cause: ProcessError,
}

/// Merge pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStage {
    /// Lossless concatenation of segments
    Concat,
    /// Optional transcode to the compressed format
    Transcode,
}

impl std::fmt::Display for MergeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStage::Concat => write!(f, "concat"),
            MergeStage::Transcode => write!(f, "transcode"),
        }
    }
}

/// Errors from merging segments into the final artifact
#[derive(Debug, Error)]
pub enum MergeError {
    /// The plan has no segments
    #[error("no segments to merge")]
    NoSegments,

    /// Lossless concatenation failed
    #[error("concat failed: {reason}")]
    Concat {
        /// What went wrong
        reason: String,
    },

    /// Transcoding the merged track failed
    #[error("transcode failed: {reason}")]
    Transcode {
        /// What went wrong
        reason: String,
    },
}

impl MergeError {
    /// The stage that failed
    pub fn stage(&self) -> MergeStage {
        match self {
            MergeError::NoSegments | MergeError::Concat { .. } => MergeStage::Concat,
            MergeError::Transcode { .. } => MergeStage::Transcode,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_message_names_the_character() {
        let err = ProcessError::InvalidArgument {
            argument: "Zoe; rm -rf /".into(),
            violation: ArgumentViolation::ForbiddenCharacter(';'),
        };
        let msg = err.to_string();
        assert!(msg.contains("';'"), "message should quote ';': {msg}");
        assert!(msg.contains("Zoe; rm -rf /"));
    }

    #[test]
    fn process_failed_message_distinguishes_signal_from_exit_code() {
        let coded = ProcessError::ProcessFailed {
            exit_code: Some(2),
            executable: Executable::AudioTool,
            stderr_tail: "bad input".into(),
        };
        assert!(coded.to_string().contains("code 2"));

        let signalled = ProcessError::ProcessFailed {
            exit_code: None,
            executable: Executable::AudioTool,
            stderr_tail: String::new(),
        };
        assert!(signalled.to_string().contains("a signal"));
    }

    #[test]
    fn conversion_error_converts_with_question_mark() {
        fn convert_directly() -> Result<()> {
            Err(ConversionError {
                chapter_index: 1,
                attempts: 2,
                cause: ProcessError::Interrupted("stopped".into()),
            })?;
            Ok(())
        }

        match convert_directly() {
            Err(Error::Conversion(e)) => assert_eq!(e.chapter_index, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn conversion_error_reports_chapter_and_attempts() {
        let err = ConversionError {
            chapter_index: 4,
            attempts: 3,
            cause: ProcessError::MissingOutput {
                path: PathBuf::from("/tmp/chapter-0005.aiff"),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("chapter 4"));
        assert!(msg.contains("3 attempt"));
    }

    #[test]
    fn merge_error_stage_mapping() {
        assert_eq!(MergeError::NoSegments.stage(), MergeStage::Concat);
        assert_eq!(
            MergeError::Concat { reason: "x".into() }.stage(),
            MergeStage::Concat
        );
        assert_eq!(
            MergeError::Transcode { reason: "x".into() }.stage(),
            MergeStage::Transcode
        );
        assert_eq!(MergeStage::Concat.to_string(), "concat");
    }

    #[test]
    fn aborted_error_exposes_pipeline_result() {
        let mut result = PipelineResult::new(10);
        result.aborted_early = true;
        let err = Error::Aborted(Box::new(result));
        assert!(err.pipeline_result().is_some());
        assert!(err.to_string().contains("0 of 10"));

        let other = Error::NoChapters;
        assert!(other.pipeline_result().is_none());
    }

    #[test]
    fn config_helper_sets_key() {
        match Error::config("quality", "must be 0-9") {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("quality"));
                assert_eq!(message, "must be 0-9");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
