//! Bounded parallel chapter conversion
//!
//! Chapters are fanned out through a buffered stream so that at most
//! `concurrency` conversions are in flight. Each conversion runs on its own
//! tokio task. The loop in [`WorkerPool::run_all`] is the only code that
//! touches the [`PipelineResult`]; workers hand their finished
//! [`ConversionTask`] back through the stream.

use crate::converter::ChapterConverter;
use crate::error::{ConversionError, Error, ProcessError, Result};
use crate::failure_policy::FailurePolicy;
use crate::types::{
    Chapter, ConversionTask, ConvertedSegment, Event, FailedChapter, PipelineResult, TaskOutcome,
};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// Runs chapter conversions concurrently and aggregates their outcomes
#[derive(Clone, Debug)]
pub struct WorkerPool {
    concurrency: usize,
    policy: FailurePolicy,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl WorkerPool {
    /// Pool with `concurrency` slots (must be at least 1)
    pub fn new(concurrency: usize, policy: FailurePolicy) -> Result<Self> {
        if concurrency == 0 {
            return Err(Error::config("jobs", "concurrency must be at least 1"));
        }
        Ok(Self {
            concurrency,
            policy,
            event_tx: None,
        })
    }

    /// Publish progress events on this channel
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Number of conversion slots
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn emit(&self, event: Event) {
        emit(self.event_tx.as_ref(), event);
    }

    /// Convert every chapter, stopping dispatch if the failure policy says so
    ///
    /// Conversions already running when the policy trips are allowed to
    /// finish and are recorded. The returned sequences are sorted by chapter
    /// index.
    pub async fn run_all(
        &self,
        chapters: Vec<Chapter>,
        converter: Arc<dyn ChapterConverter>,
    ) -> PipelineResult {
        let total = chapters.len();
        let mut result = PipelineResult::new(total);
        let stop_dispatch = CancellationToken::new();

        tracing::info!(
            chapters = total,
            concurrency = self.concurrency,
            threshold = self.policy.threshold(),
            "starting chapter conversion"
        );

        let mut completions = stream::iter(chapters)
            .map(|chapter| {
                let converter = Arc::clone(&converter);
                let stop_dispatch = stop_dispatch.clone();
                let event_tx = self.event_tx.clone();

                async move {
                    if stop_dispatch.is_cancelled() {
                        tracing::debug!(chapter = chapter.index, "skipping chapter after abort");
                        return None;
                    }

                    let index = chapter.index;
                    emit(event_tx.as_ref(), Event::ChapterStarted { index });

                    let joined = tokio::spawn(async move {
                        let mut task = ConversionTask::new(chapter);
                        let outcome = converter.convert(&task.chapter).await;
                        task.complete(outcome);
                        task
                    })
                    .await;

                    Some((index, joined))
                }
            })
            .buffer_unordered(self.concurrency);

        while let Some(completion) = completions.next().await {
            let Some((index, joined)) = completion else {
                continue;
            };

            self.record(&mut result, index, joined);

            let failed = result.failed.len();
            self.emit(Event::Progress {
                completed: result.completed(),
                failed,
                total,
            });

            if !result.aborted_early && self.policy.should_abort(total, failed) {
                tracing::warn!(
                    failed,
                    total,
                    threshold = self.policy.threshold(),
                    "failure threshold exceeded, no further chapters will be started"
                );
                result.aborted_early = true;
                stop_dispatch.cancel();
                self.emit(Event::ThresholdExceeded { failed, total });
            }
        }

        result.sort();

        tracing::info!(
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            skipped = total - result.completed(),
            aborted = result.aborted_early,
            "chapter conversion finished"
        );

        result
    }

    fn record(
        &self,
        result: &mut PipelineResult,
        index: usize,
        joined: std::result::Result<ConversionTask, JoinError>,
    ) {
        let outcome = match joined {
            Ok(task) if !task.is_finished() => {
                Err(interrupted(index, "conversion finished without an outcome"))
            }
            Ok(task) => match (task.outcome, task.segment_path) {
                (TaskOutcome::Succeeded, Some(path)) => Ok((path, task.attempt)),
                (TaskOutcome::Failed(error), _) => Err(error),
                _ => Err(interrupted(index, "conversion succeeded without a segment")),
            },
            Err(e) => Err(interrupted(index, &format!("conversion task failed: {e}"))),
        };

        match outcome {
            Ok((path, attempts)) => {
                tracing::info!(chapter = index, attempts, "chapter converted");
                self.emit(Event::ChapterConverted {
                    index,
                    path: path.clone(),
                    attempts,
                });
                result.succeeded.push(ConvertedSegment { index, path });
            }
            Err(error) => {
                tracing::error!(
                    chapter = index,
                    attempts = error.attempts,
                    error = %error.cause,
                    "chapter failed"
                );
                self.emit(Event::ChapterFailed {
                    index,
                    error: error.to_string(),
                });
                result.failed.push(FailedChapter { index, error });
            }
        }
    }
}

fn interrupted(index: usize, reason: &str) -> ConversionError {
    ConversionError {
        chapter_index: index,
        attempts: 0,
        cause: ProcessError::Interrupted(reason.to_string()),
    }
}

fn emit(event_tx: Option<&broadcast::Sender<Event>>, event: Event) {
    if let Some(tx) = event_tx {
        tx.send(event).ok();
    }
}
