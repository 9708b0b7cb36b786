//! Core types for epub2audio

use crate::config::OutputFormat;
use crate::error::ConversionError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One ordered unit of book text
///
/// Produced once per book by the extraction step and read-only afterwards.
/// `index` is zero-based and is the only ordering key used anywhere in the
/// pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// Zero-based position in the book
    pub index: usize,
    /// Plain text to synthesize
    pub text: String,
    /// Chapter title, when the source provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Chapter {
    /// Create an untitled chapter
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            title: None,
        }
    }

    /// Attach a title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Build chapters from plain text chunks in reading order
    pub fn from_texts<I, S>(texts: I) -> Vec<Chapter>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chapter::new(index, text))
            .collect()
    }
}

/// A successfully synthesized segment file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Path of the lossless segment
    pub path: PathBuf,
    /// Attempts it took, including the successful one
    pub attempts: u32,
}

/// Outcome of a single chapter conversion
#[derive(Debug, Default)]
pub enum TaskOutcome {
    /// Not yet run
    #[default]
    Pending,
    /// Segment produced
    Succeeded,
    /// Failed after exhausting retries (or immediately, if not retryable)
    Failed(ConversionError),
}

/// One chapter's conversion, owned by the worker slot processing it
#[derive(Debug)]
pub struct ConversionTask {
    /// The chapter being converted
    pub chapter: Chapter,
    /// Attempts made so far
    pub attempt: u32,
    /// Segment file, set once synthesis succeeds
    pub segment_path: Option<PathBuf>,
    /// Current outcome
    pub outcome: TaskOutcome,
}

impl ConversionTask {
    /// A fresh, pending task
    pub fn new(chapter: Chapter) -> Self {
        Self {
            chapter,
            attempt: 0,
            segment_path: None,
            outcome: TaskOutcome::Pending,
        }
    }

    /// Record the converter's result
    pub fn complete(&mut self, result: Result<Segment, ConversionError>) {
        match result {
            Ok(segment) => {
                self.attempt = segment.attempts;
                self.segment_path = Some(segment.path);
                self.outcome = TaskOutcome::Succeeded;
            }
            Err(err) => {
                self.attempt = err.attempts;
                self.segment_path = None;
                self.outcome = TaskOutcome::Failed(err);
            }
        }
    }

    /// Whether the task has finished either way
    pub fn is_finished(&self) -> bool {
        !matches!(self.outcome, TaskOutcome::Pending)
    }
}

/// A converted chapter in the pipeline result
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConvertedSegment {
    /// Chapter index
    pub index: usize,
    /// Segment file
    pub path: PathBuf,
}

/// A chapter that permanently failed
#[derive(Debug)]
pub struct FailedChapter {
    /// Chapter index
    pub index: usize,
    /// Last error, after retries
    pub error: ConversionError,
}

/// Aggregated result of a worker pool run
///
/// When the run completes, `succeeded` and `failed` together cover every
/// chapter index exactly once. When `aborted_early` is set, indices that were
/// never dispatched appear in neither list.
#[derive(Debug)]
pub struct PipelineResult {
    /// Converted chapters, sorted by index once the run finishes
    pub succeeded: Vec<ConvertedSegment>,
    /// Failed chapters, sorted by index once the run finishes
    pub failed: Vec<FailedChapter>,
    /// Whether the failure threshold stopped dispatch
    pub aborted_early: bool,
    /// Number of chapters handed to the pool
    pub total_chapters: usize,
}

impl PipelineResult {
    /// Empty result for a run over `total_chapters`
    pub fn new(total_chapters: usize) -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            aborted_early: false,
            total_chapters,
        }
    }

    /// Number of chapters that reached a final outcome
    pub fn completed(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Sort both sequences into book order
    pub(crate) fn sort(&mut self) {
        self.succeeded.sort_by_key(|s| s.index);
        self.failed.sort_by_key(|f| f.index);
    }

    /// Indices that were never attempted because the run aborted
    pub fn skipped_indices(&self) -> Vec<usize> {
        let mut seen = vec![false; self.total_chapters];
        for index in self
            .succeeded
            .iter()
            .map(|s| s.index)
            .chain(self.failed.iter().map(|f| f.index))
        {
            if let Some(slot) = seen.get_mut(index) {
                *slot = true;
            }
        }
        seen.iter()
            .enumerate()
            .filter(|(_, done)| !**done)
            .map(|(i, _)| i)
            .collect()
    }

    /// Counts for the final report
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            succeeded: self.succeeded.len(),
            failed: self.failed.len(),
            total: self.total_chapters,
            aborted: self.aborted_early,
        }
    }
}

/// Final counts of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Chapters converted
    pub succeeded: usize,
    /// Chapters permanently failed
    pub failed: usize,
    /// Chapters in the book
    pub total: usize,
    /// Whether the failure threshold stopped the run
    pub aborted: bool,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} total",
            self.succeeded, self.failed, self.total
        )?;
        if self.aborted {
            write!(f, " (aborted: failure threshold exceeded)")?;
        }
        Ok(())
    }
}

/// Inputs to the merge stage
///
/// `ordered_segments` is always in chapter index order; failed chapters are
/// simply absent.
#[derive(Clone, Debug, PartialEq)]
pub struct MergePlan {
    /// Segment files in chapter order
    pub ordered_segments: Vec<PathBuf>,
    /// Requested final format
    pub output_format: OutputFormat,
    /// Compressed-format quality (0 = best, 9 = smallest)
    pub quality: Option<u8>,
    /// Path of the final artifact
    pub destination: PathBuf,
    /// Keep the per-chapter segments after a successful merge
    pub keep_segments: bool,
    /// Keep the lossless intermediate when transcoding
    pub keep_intermediate: bool,
}

impl MergePlan {
    /// Build a plan from the converted chapters of a run
    pub fn from_result(
        result: &PipelineResult,
        output_format: OutputFormat,
        quality: Option<u8>,
        destination: PathBuf,
    ) -> Self {
        let mut succeeded: Vec<&ConvertedSegment> = result.succeeded.iter().collect();
        succeeded.sort_by_key(|s| s.index);
        Self {
            ordered_segments: succeeded.into_iter().map(|s| s.path.clone()).collect(),
            output_format,
            quality,
            destination,
            keep_segments: false,
            keep_intermediate: false,
        }
    }

    /// Set segment retention
    pub fn keep_segments(mut self, keep: bool) -> Self {
        self.keep_segments = keep;
        self
    }

    /// Path of the lossless merge artifact for this plan
    ///
    /// For lossless output this is the destination itself; otherwise a
    /// sibling file with the lossless extension.
    pub fn lossless_path(&self) -> PathBuf {
        match self.output_format {
            OutputFormat::Lossless => self.destination.clone(),
            OutputFormat::Compressed => self
                .destination
                .with_extension(OutputFormat::Lossless.extension()),
        }
    }
}

/// Event emitted during a run
///
/// Consumers subscribe to these via [`crate::Pipeline::subscribe`]. Progress
/// events are advisory only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A worker picked up a chapter
    ChapterStarted {
        /// Chapter index
        index: usize,
    },

    /// A chapter was converted
    ChapterConverted {
        /// Chapter index
        index: usize,
        /// Segment file
        path: PathBuf,
        /// Attempts used
        attempts: u32,
    },

    /// A chapter permanently failed
    ChapterFailed {
        /// Chapter index
        index: usize,
        /// Last error
        error: String,
    },

    /// Running tally after each completion
    Progress {
        /// Chapters finished (either way)
        completed: usize,
        /// Chapters failed so far
        failed: usize,
        /// Chapters in the book
        total: usize,
    },

    /// Failure ratio exceeded the threshold; no further chapters are dispatched
    ThresholdExceeded {
        /// Chapters failed so far
        failed: usize,
        /// Chapters in the book
        total: usize,
    },

    /// Concatenation started
    Merging {
        /// Number of segments being joined
        segments: usize,
    },

    /// Transcode started
    Transcoding {
        /// Lossless input
        input: PathBuf,
    },

    /// Final artifact written
    Complete {
        /// Final artifact
        path: PathBuf,
        /// Final counts
        summary: RunSummary,
    },
}
