//! Book-level orchestration: convert, decide, merge
//!
//! [`Pipeline::convert_book`] is the single entry point an embedding CLI
//! calls. Every tunable arrives in [`BookOptions`]; nothing is read from the
//! environment here.

use crate::config::{Config, MAX_JOBS, MAX_QUALITY, OutputFormat};
use crate::converter::CliChapterConverter;
use crate::epub::load_book;
use crate::error::{Error, Result};
use crate::failure_policy::FailurePolicy;
use crate::merge::AudioMerger;
use crate::process::{ProcessRunner, SecureProcessRunner, Voice, validate_argument};
use crate::retry::RetryConfig;
use crate::types::{Chapter, Event, MergePlan, PipelineResult, RunSummary};
use crate::utils::{
    create_output_directory, remove_stale_segments, sanitize_filename, segment_file_name,
};
use crate::worker_pool::WorkerPool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Capacity of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Everything one book conversion needs
#[derive(Clone, Debug)]
pub struct BookOptions {
    /// Book name, used for the output directory and file names
    pub book_name: String,
    /// Synthesis voice (`None` = the tool's default)
    pub voice: Option<String>,
    /// Parallel conversions
    pub concurrency: usize,
    /// Retries per chapter after the first attempt
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Randomize the retry delay
    pub retry_jitter: bool,
    /// Tolerated fraction of failed chapters
    pub failure_threshold: f64,
    /// Final format
    pub output_format: OutputFormat,
    /// Compressed quality, 0 = best
    pub quality: Option<u8>,
    /// Keep per-chapter segments next to the final artifact
    pub keep_chapter_files: bool,
    /// Remove stale segments from a kept chapter directory first
    pub cleanup_old_files: bool,
    /// Base output directory
    pub output_dir: PathBuf,
    /// Suffix of the kept chapter directory
    pub chapter_suffix: String,
    /// Limit for one synthesis call
    pub conversion_timeout: Duration,
    /// Limit for each merge stage
    pub merge_timeout: Duration,
}

impl BookOptions {
    /// Options with the default settings and an explicit concurrency
    pub fn new(book_name: impl Into<String>, concurrency: usize) -> Self {
        let mut options = Self::from_config(&Config::default(), book_name);
        options.concurrency = concurrency;
        options
    }

    /// Options from a loaded configuration
    pub fn from_config(config: &Config, book_name: impl Into<String>) -> Self {
        Self {
            book_name: book_name.into(),
            voice: config.audio.voice.clone().filter(|v| !v.is_empty()),
            concurrency: config.resolved_jobs(),
            max_retries: config.processing.max_retries,
            retry_delay: config.processing.retry_delay,
            retry_jitter: config.processing.retry_jitter,
            failure_threshold: config.processing.failure_threshold,
            output_format: config.audio.format,
            quality: Some(config.audio.mp3_quality),
            keep_chapter_files: config.audio.keep_chapters,
            cleanup_old_files: config.audio.cleanup_old_files,
            output_dir: config.directories.output_dir.clone(),
            chapter_suffix: config.directories.chapter_suffix.clone(),
            conversion_timeout: config.timeouts.conversion,
            merge_timeout: config.timeouts.merge,
        }
    }

    /// Check the options and return the parsed voice
    pub fn validate(&self) -> Result<Option<Voice>> {
        if !(1..=MAX_JOBS).contains(&self.concurrency) {
            return Err(Error::config(
                "jobs",
                format!("concurrency must be between 1 and {MAX_JOBS}, got {}", self.concurrency),
            ));
        }
        if let Some(quality) = self.quality
            && quality > MAX_QUALITY
        {
            return Err(Error::config(
                "mp3_quality",
                format!("quality must be between 0 and {MAX_QUALITY}, got {quality}"),
            ));
        }
        if self.conversion_timeout.is_zero() || self.merge_timeout.is_zero() {
            return Err(Error::config("timeouts", "timeouts must be positive"));
        }
        if self.chapter_suffix.contains(['/', '\\']) {
            return Err(Error::config(
                "chapter_suffix",
                "chapter_suffix must not contain path separators",
            ));
        }
        FailurePolicy::new(self.failure_threshold)?;
        self.validate_paths()?;

        self.voice
            .as_deref()
            .map(|voice| {
                Voice::parse(voice)
                    .map_err(|e| Error::config("voice", format!("invalid voice {voice:?}: {e}")))
            })
            .transpose()
    }

    /// Generated paths must be passable to the tools as arguments
    fn validate_paths(&self) -> Result<()> {
        let safe_name = sanitize_filename(&self.book_name);
        let book_dir = self.output_dir.join(&safe_name);
        let segment = book_dir
            .join(self.segment_dir_name(&safe_name))
            .join(segment_file_name(0));
        let artifact = book_dir.join(format!("{safe_name}.{}", self.output_format.extension()));

        let checks = [
            ("output_dir", &self.output_dir),
            ("chapter_suffix", &segment),
            ("book_name", &artifact),
        ];
        for (key, path) in checks {
            let text = path.to_str().ok_or_else(|| {
                Error::config(key, format!("{} is not valid UTF-8", path.display()))
            })?;
            validate_argument(text).map_err(|e| {
                Error::config(key, format!("unusable output path {}: {e}", path.display()))
            })?;
        }
        Ok(())
    }

    /// Kept segments go to `<name><suffix>`, scratch ones to a hidden directory
    fn segment_dir_name(&self, safe_name: &str) -> String {
        if self.keep_chapter_files {
            format!("{safe_name}{}", self.chapter_suffix)
        } else {
            format!(".{safe_name}_segments")
        }
    }

    fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            delay: self.retry_delay,
            jitter: self.retry_jitter,
        }
    }
}

/// A finished book
#[derive(Debug)]
pub struct BookOutput {
    /// The final audio file
    pub artifact: PathBuf,
    /// Per-chapter outcomes, including any failures that were tolerated
    pub result: PipelineResult,
    /// Final counts
    pub summary: RunSummary,
    /// Directory holding the kept segments, when retention was requested
    pub chapter_dir: Option<PathBuf>,
}

/// Converts books using a process runner
///
/// # Examples
///
/// ```no_run
/// use epub2audio::{BookOptions, Chapter, Pipeline};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = Pipeline::with_system_tools();
/// let mut events = pipeline.subscribe();
/// tokio::spawn(async move {
///     while let Ok(event) = events.recv().await {
///         println!("{:?}", event);
///     }
/// });
///
/// let chapters = Chapter::from_texts(["Chapter one.", "Chapter two."]);
/// let output = pipeline.convert_book(chapters, &BookOptions::new("My Book", 2)).await?;
/// println!("{} ({})", output.artifact.display(), output.summary);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    runner: Arc<dyn ProcessRunner>,
    event_tx: broadcast::Sender<Event>,
}

impl Pipeline {
    /// Pipeline over any runner
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { runner, event_tx }
    }

    /// Pipeline using the sandboxed runner on the standard search path
    pub fn with_system_tools() -> Self {
        Self::new(Arc::new(SecureProcessRunner::new()))
    }

    /// Pipeline using the sandboxed runner with the configured tool directories
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(SecureProcessRunner::from_config(&config.tools)))
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Convert chapters and merge them into one audio file
    ///
    /// Options are validated before any worker starts. A run that trips the
    /// failure threshold returns [`Error::Aborted`]; a run in which every
    /// chapter failed returns [`Error::NoSegments`]. Both carry the full
    /// [`PipelineResult`]. A run with tolerated failures succeeds and
    /// reports them in [`BookOutput::result`].
    pub async fn convert_book(
        &self,
        chapters: Vec<Chapter>,
        options: &BookOptions,
    ) -> Result<BookOutput> {
        let voice = options.validate()?;
        let policy = FailurePolicy::new(options.failure_threshold)?;
        if chapters.is_empty() {
            return Err(Error::NoChapters);
        }
        let mut seen = HashSet::with_capacity(chapters.len());
        if let Some(dup) = chapters.iter().find(|c| !seen.insert(c.index)) {
            return Err(Error::config(
                "chapters",
                format!("chapter index {} appears more than once", dup.index),
            ));
        }

        let safe_name = sanitize_filename(&options.book_name);
        let book_dir = create_output_directory(&options.output_dir, &options.book_name).await?;
        let segment_dir = prepare_segment_dir(&book_dir, &safe_name, options).await?;

        tracing::info!(
            book = %options.book_name,
            chapters = chapters.len(),
            output = %book_dir.display(),
            format = %options.output_format,
            "converting book"
        );

        let converter = CliChapterConverter::new(Arc::clone(&self.runner), &segment_dir)
            .with_parsed_voice(voice)
            .with_retry(options.retry())
            .with_timeout(options.conversion_timeout);
        let pool = WorkerPool::new(options.concurrency, policy)?
            .with_events(self.event_tx.clone());

        let result = pool.run_all(chapters, Arc::new(converter)).await;

        if result.aborted_early {
            tracing::error!(
                failed = result.failed.len(),
                total = result.total_chapters,
                "run aborted by failure threshold"
            );
            discard_scratch(&segment_dir, options).await;
            return Err(Error::Aborted(Box::new(result)));
        }
        if result.succeeded.is_empty() {
            tracing::error!(total = result.total_chapters, "every chapter failed");
            discard_scratch(&segment_dir, options).await;
            return Err(Error::NoSegments(Box::new(result)));
        }
        if !result.failed.is_empty() {
            let missing: Vec<usize> = result.failed.iter().map(|f| f.index).collect();
            tracing::warn!(
                failed = ?missing,
                "continuing without failed chapters; they will be missing from the audio"
            );
        }

        let destination = book_dir.join(format!(
            "{safe_name}.{}",
            options.output_format.extension()
        ));
        let plan = MergePlan::from_result(
            &result,
            options.output_format,
            options.quality,
            destination,
        )
        .keep_segments(options.keep_chapter_files);

        let merger = AudioMerger::new(Arc::clone(&self.runner), options.merge_timeout)
            .with_events(self.event_tx.clone());
        let artifact = match merger.merge(&plan).await {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::error!(
                    stage = %e.stage(),
                    error = %e,
                    segments = %segment_dir.display(),
                    "merge failed, partial outputs left in place"
                );
                return Err(e.into());
            }
        };

        discard_scratch(&segment_dir, options).await;

        let summary = result.summary();
        tracing::info!(artifact = %artifact.display(), %summary, "book complete");
        self.event_tx
            .send(Event::Complete {
                path: artifact.clone(),
                summary,
            })
            .ok();

        Ok(BookOutput {
            artifact,
            summary,
            result,
            chapter_dir: options.keep_chapter_files.then_some(segment_dir),
        })
    }

    /// Read an EPUB and convert its chapters
    ///
    /// The file is validated first; an EPUB without narrative text yields
    /// [`Error::NoChapters`].
    pub async fn convert_epub(&self, path: &Path, options: &BookOptions) -> Result<BookOutput> {
        let book = load_book(path).await?;
        tracing::debug!(title = %book.title, path = %path.display(), "loaded EPUB");
        self.convert_book(book.chapters, options).await
    }
}

/// Directory the segments are written to
///
/// Kept segments go to `<book>/<name><suffix>`; otherwise a hidden scratch
/// directory inside the book directory is used and removed afterwards.
async fn prepare_segment_dir(book_dir: &Path, safe_name: &str, options: &BookOptions) -> Result<PathBuf> {
    let dir = book_dir.join(options.segment_dir_name(safe_name));

    tokio::fs::create_dir_all(&dir).await?;
    if options.cleanup_old_files || !options.keep_chapter_files {
        remove_stale_segments(&dir).await?;
    }
    Ok(dir)
}

async fn discard_scratch(segment_dir: &Path, options: &BookOptions) {
    if options.keep_chapter_files {
        return;
    }
    if let Err(e) = tokio::fs::remove_dir_all(segment_dir).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(dir = %segment_dir.display(), error = %e, "failed to remove segment directory");
    }
}

/// Convert a book with the sandboxed runner on the standard search path
pub async fn convert_book(chapters: Vec<Chapter>, options: &BookOptions) -> Result<BookOutput> {
    Pipeline::with_system_tools()
        .convert_book(chapters, options)
        .await
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MergeError, ProcessError};
    use crate::process::{Executable, ProcessOutput, ProcessSpec};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Runner that fakes both tools in-process
    ///
    /// The speech tool writes the chapter text into the segment; chapters
    /// whose text contains `FAIL` exit non-zero. The audio tool joins the
    /// concat list, or prefixes the input with `MP3:` when transcoding.
    #[derive(Default)]
    struct FakeTools {
        fail_merge: bool,
        speech_calls: Mutex<Vec<Vec<String>>>,
        audio_calls: Mutex<Vec<Vec<String>>>,
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> &'a str {
        let i = args.iter().position(|a| a == flag).unwrap();
        &args[i + 1]
    }

    fn failed(executable: Executable) -> ProcessError {
        ProcessError::ProcessFailed {
            exit_code: Some(1),
            executable,
            stderr_tail: String::new(),
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeTools {
        async fn run(&self, spec: &ProcessSpec) -> std::result::Result<ProcessOutput, ProcessError> {
            let args = spec.args().to_vec();
            match spec.executable() {
                Executable::SpeechSynth => {
                    self.speech_calls.lock().unwrap().push(args.clone());
                    let text = std::fs::read_to_string(value_after(&args, "-f")).unwrap();
                    if text.contains("FAIL") {
                        return Err(failed(Executable::SpeechSynth));
                    }
                    std::fs::write(value_after(&args, "-o"), text).unwrap();
                }
                Executable::AudioTool => {
                    self.audio_calls.lock().unwrap().push(args.clone());
                    if self.fail_merge {
                        return Err(failed(Executable::AudioTool));
                    }
                    let output = args.last().unwrap();
                    if args.iter().any(|a| a == "concat") {
                        let list = std::fs::read_to_string(value_after(&args, "-i")).unwrap();
                        let mut joined = String::new();
                        for line in list.lines() {
                            let path = &line["file '".len()..line.len() - 1];
                            joined.push_str(&std::fs::read_to_string(path).unwrap());
                        }
                        std::fs::write(output, joined).unwrap();
                    } else {
                        let input = std::fs::read_to_string(value_after(&args, "-i")).unwrap();
                        std::fs::write(output, format!("MP3:{input}")).unwrap();
                    }
                }
            }
            Ok(ProcessOutput::default())
        }
    }

    fn options(out: &Path) -> BookOptions {
        let mut options = BookOptions::new("Test Book", 3);
        options.output_dir = out.to_path_buf();
        options.retry_delay = Duration::from_millis(1);
        options.max_retries = 1;
        options
    }

    fn book(texts: &[&str]) -> Vec<Chapter> {
        Chapter::from_texts(texts.iter().copied())
    }

    #[tokio::test]
    async fn converts_and_merges_in_order() {
        let temp = TempDir::new().unwrap();
        let pipeline = Pipeline::new(Arc::new(FakeTools::default()));

        let output = pipeline
            .convert_book(book(&["a", "b", "c", "d"]), &options(temp.path()))
            .await
            .unwrap();

        assert_eq!(
            output.artifact,
            temp.path().join("Test Book").join("Test Book.aiff")
        );
        assert_eq!(std::fs::read_to_string(&output.artifact).unwrap(), "abcd");
        assert_eq!(
            output.summary,
            RunSummary {
                succeeded: 4,
                failed: 0,
                total: 4,
                aborted: false
            }
        );
        assert!(output.chapter_dir.is_none());
        assert!(!temp.path().join("Test Book").join(".Test Book_segments").exists());
    }

    #[tokio::test]
    async fn tolerated_failures_are_reported_and_skipped() {
        let temp = TempDir::new().unwrap();
        let pipeline = Pipeline::new(Arc::new(FakeTools::default()));

        let output = pipeline
            .convert_book(book(&["a", "FAIL", "c", "d"]), &options(temp.path()))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&output.artifact).unwrap(), "acd");
        assert_eq!(output.summary.failed, 1);
        assert_eq!(output.result.failed[0].index, 1);
        assert_eq!(output.result.failed[0].error.attempts, 2);
    }

    #[tokio::test]
    async fn threshold_abort_is_distinct_from_a_crash() {
        let temp = TempDir::new().unwrap();
        let pipeline = Pipeline::new(Arc::new(FakeTools::default()));
        let mut opts = options(temp.path());
        opts.failure_threshold = 0.25;

        let err = pipeline
            .convert_book(book(&["FAIL", "FAIL", "c", "d"]), &opts)
            .await
            .unwrap_err();

        match err {
            Error::Aborted(result) => {
                assert!(result.aborted_early);
                assert!(result.failed.len() >= 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_failed_under_full_threshold_is_no_segments() {
        let temp = TempDir::new().unwrap();
        let pipeline = Pipeline::new(Arc::new(FakeTools::default()));
        let mut opts = options(temp.path());
        opts.failure_threshold = 1.0;

        let err = pipeline
            .convert_book(book(&["FAIL", "FAIL"]), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSegments(_)));
        assert_eq!(err.pipeline_result().unwrap().failed.len(), 2);
    }

    #[tokio::test]
    async fn compressed_output_and_kept_chapters() {
        let temp = TempDir::new().unwrap();
        let tools = Arc::new(FakeTools::default());
        let pipeline = Pipeline::new(tools.clone());
        let mut opts = options(temp.path());
        opts.output_format = OutputFormat::Compressed;
        opts.keep_chapter_files = true;

        let output = pipeline
            .convert_book(book(&["x", "y"]), &opts)
            .await
            .unwrap();

        assert_eq!(output.artifact.extension().unwrap(), "mp3");
        assert_eq!(std::fs::read_to_string(&output.artifact).unwrap(), "MP3:xy");

        let chapter_dir = output.chapter_dir.unwrap();
        assert_eq!(chapter_dir.file_name().unwrap(), "Test Book_chapters");
        assert!(chapter_dir.join("chapter-0001.aiff").exists());
        assert!(chapter_dir.join("chapter-0002.aiff").exists());
        assert_eq!(tools.audio_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn merge_failure_is_fatal_and_keeps_segments() {
        let temp = TempDir::new().unwrap();
        let tools = Arc::new(FakeTools {
            fail_merge: true,
            ..Default::default()
        });
        let pipeline = Pipeline::new(tools.clone());

        let err = pipeline
            .convert_book(book(&["a", "b"]), &options(temp.path()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Merge(MergeError::Concat { .. })));
        // No automatic retry of the merge
        assert_eq!(tools.audio_calls.lock().unwrap().len(), 1);
        let scratch = temp.path().join("Test Book").join(".Test Book_segments");
        assert!(scratch.join("chapter-0001.aiff").exists());
    }

    #[tokio::test]
    async fn invalid_voice_fails_before_any_work() {
        let temp = TempDir::new().unwrap();
        let tools = Arc::new(FakeTools::default());
        let pipeline = Pipeline::new(tools.clone());
        let mut opts = options(temp.path());
        opts.voice = Some("Zoe; rm -rf /".into());

        let err = pipeline.convert_book(book(&["a"]), &opts).await.unwrap_err();
        match err {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("voice"));
                assert!(message.contains("';'"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!temp.path().join("Test Book").exists());
    }

    #[tokio::test]
    async fn book_names_with_shell_characters_still_convert() {
        let temp = TempDir::new().unwrap();
        let tools = Arc::new(FakeTools::default());
        let pipeline = Pipeline::new(tools.clone());
        let mut opts = options(temp.path());
        opts.book_name = "Pride & Prejudice".into();

        let output = pipeline
            .convert_book(book(&["a", "b", "c"]), &opts)
            .await
            .unwrap();

        assert_eq!(output.summary.succeeded, 3);
        assert!(output.result.failed.is_empty());
        assert_eq!(
            output.artifact,
            temp.path().join("Pride _ Prejudice").join("Pride _ Prejudice.aiff")
        );
    }

    #[tokio::test]
    async fn unusable_output_dir_fails_before_any_work() {
        let temp = TempDir::new().unwrap();
        let tools = Arc::new(FakeTools::default());
        let pipeline = Pipeline::new(tools.clone());
        let mut opts = options(&temp.path().join("R&D"));
        opts.keep_chapter_files = true;

        let err = pipeline.convert_book(book(&["a"]), &opts).await.unwrap_err();
        match err {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("output_dir"));
                assert!(message.contains("'&'"), "message: {message}");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(tools.speech_calls.lock().unwrap().is_empty());
        assert!(!temp.path().join("R&D").exists());

        opts.chapter_suffix = "_$chapters".into();
        opts.output_dir = temp.path().to_path_buf();
        assert!(matches!(
            opts.validate(),
            Err(Error::Config { key: Some(key), .. }) if key == "chapter_suffix"
        ));
    }

    #[tokio::test]
    async fn duplicate_chapter_indices_are_rejected() {
        let temp = TempDir::new().unwrap();
        let tools = Arc::new(FakeTools::default());
        let pipeline = Pipeline::new(tools.clone());
        let chapters = vec![Chapter::new(0, "a"), Chapter::new(1, "b"), Chapter::new(1, "c")];

        let err = pipeline
            .convert_book(chapters, &options(temp.path()))
            .await
            .unwrap_err();
        match err {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("chapters"));
                assert!(message.contains("index 1"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(tools.speech_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_book_is_rejected() {
        let temp = TempDir::new().unwrap();
        let pipeline = Pipeline::new(Arc::new(FakeTools::default()));
        let err = pipeline
            .convert_book(Vec::new(), &options(temp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoChapters));
    }

    #[tokio::test]
    async fn complete_event_is_published() {
        let temp = TempDir::new().unwrap();
        let pipeline = Pipeline::new(Arc::new(FakeTools::default()));
        let mut events = pipeline.subscribe();

        let output = pipeline
            .convert_book(book(&["a"]), &options(temp.path()))
            .await
            .unwrap();

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(Event::Complete {
                path: output.artifact,
                summary: output.summary
            })
        );
    }

    #[test]
    fn options_validation() {
        let mut opts = BookOptions::new("b", 0);
        assert!(matches!(opts.validate(), Err(Error::Config { .. })));

        opts.concurrency = 2;
        assert!(opts.validate().unwrap().is_none());

        opts.quality = Some(10);
        assert!(opts.validate().is_err());
        opts.quality = Some(9);

        opts.failure_threshold = 1.5;
        assert!(opts.validate().is_err());
        opts.failure_threshold = 0.5;

        opts.voice = Some("Zoe (Enhanced)".into());
        assert_eq!(opts.validate().unwrap().unwrap().as_str(), "Zoe (Enhanced)");
    }

    #[test]
    fn options_from_config() {
        let mut config = Config::default();
        config.processing.jobs = Some(5);
        config.audio.voice = Some(String::new());
        config.audio.format = OutputFormat::Compressed;
        config.audio.mp3_quality = 4;

        let opts = BookOptions::from_config(&config, "Book");
        assert_eq!(opts.concurrency, 5);
        assert!(opts.voice.is_none());
        assert_eq!(opts.output_format, OutputFormat::Compressed);
        assert_eq!(opts.quality, Some(4));
        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.chapter_suffix, "_chapters");
    }
}
