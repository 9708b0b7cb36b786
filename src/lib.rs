//! # epub2audio
//!
//! Parallel EPUB to audiobook conversion.
//!
//! Chapters are synthesized to audio segments by an external speech tool,
//! several at a time, and the segments are then joined (and optionally
//! transcoded) into one audio file by an external audio tool.
//!
//! ## Design Philosophy
//!
//! epub2audio is designed to be:
//! - **Library-first** - No CLI, an embedding application parses arguments
//!   and installs its own `tracing` subscriber
//! - **Sandboxed** - Only two whitelisted tools are ever run, with checked
//!   arguments, a minimal environment and a hard timeout
//! - **Failure-tolerant** - A configurable fraction of chapters may fail
//!   before the run stops
//! - **Event-driven** - Consumers subscribe to progress events
//!
//! ## Quick Start
//!
//! ```no_run
//! use epub2audio::{BookOptions, Config, Pipeline};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_or_default(Path::new("epub2audio.json"))?;
//!     config.validate()?;
//!
//!     let pipeline = Pipeline::from_config(&config);
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let options = BookOptions::from_config(&config, "My Book");
//!     let output = pipeline
//!         .convert_epub(Path::new("my-book.epub"), &options)
//!         .await?;
//!     println!("wrote {} ({})", output.artifact.display(), output.summary);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Chapter to audio segment conversion
pub mod converter;
/// EPUB reading and text export
pub mod epub;
/// Error types
pub mod error;
/// Tolerated failure ratio
pub mod failure_policy;
/// Segment concatenation and transcoding
pub mod merge;
/// Book-level orchestration
pub mod pipeline;
/// Sandboxed execution of external tools
pub mod process;
/// Fixed-delay retry logic
pub mod retry;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Bounded parallel chapter conversion
pub mod worker_pool;

// Re-export commonly used types
pub use config::{Config, OutputFormat};
pub use converter::{ChapterConverter, CliChapterConverter};
pub use epub::Book;
pub use error::{ConversionError, Error, MergeError, ProcessError, Result};
pub use failure_policy::FailurePolicy;
pub use merge::AudioMerger;
pub use pipeline::{BookOptions, BookOutput, Pipeline, convert_book};
pub use process::{Executable, ProcessRunner, ProcessSpec, SecureProcessRunner};
pub use types::{Chapter, Event, MergePlan, PipelineResult, RunSummary, Segment};
pub use worker_pool::WorkerPool;
