//! Configuration types for epub2audio
//!
//! Every tunable is a named, typed field with a serde default. The embedding
//! application loads a [`Config`] (or builds one in code), calls
//! [`Config::validate`] once at the boundary, and derives
//! [`BookOptions`](crate::BookOptions) from it.

use crate::error::{Error, Result};
use crate::process::Voice;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Highest accepted value for the parallel job count
pub const MAX_JOBS: usize = 32;

/// Highest (smallest-file) compressed quality level
pub const MAX_QUALITY: u8 = 9;

/// Final audio format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Uncompressed AIFF, the same format the per-chapter segments use (default)
    #[default]
    #[serde(rename = "aiff")]
    Lossless,
    /// MP3, transcoded once from the merged lossless track
    #[serde(rename = "mp3")]
    Compressed,
}

impl OutputFormat {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Lossless => "aiff",
            OutputFormat::Compressed => "mp3",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aiff" => Ok(OutputFormat::Lossless),
            "mp3" => Ok(OutputFormat::Compressed),
            other => Err(Error::config(
                "format",
                format!("invalid format: {other}. Must be one of: aiff, mp3"),
            )),
        }
    }
}

/// Voice, format and output retention
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Synthesis voice (None = the tool's default voice)
    #[serde(default)]
    pub voice: Option<String>,

    /// Final output format (default: aiff)
    #[serde(default)]
    pub format: OutputFormat,

    /// MP3 VBR quality, 0 = best (default: 0)
    #[serde(default)]
    pub mp3_quality: u8,

    /// Keep the per-chapter segment files next to the final artifact
    #[serde(default)]
    pub keep_chapters: bool,

    /// Remove stale segment files from the chapter directory before a run (default: true)
    #[serde(default = "default_true")]
    pub cleanup_old_files: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            voice: None,
            format: OutputFormat::default(),
            mp3_quality: 0,
            keep_chapters: false,
            cleanup_old_files: true,
        }
    }
}

/// Concurrency, retry and failure policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Parallel conversions (None = available processing units minus one)
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Retries per chapter after the first attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts (default: 1 second)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,

    /// Add random jitter to the retry delay (default: false)
    #[serde(default)]
    pub retry_jitter: bool,

    /// Tolerated fraction of failed chapters before aborting (default: 0.5)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            jobs: None,
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            retry_jitter: false,
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// Wall-clock limits for external tools
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Limit per chapter synthesis attempt (default: 300 seconds)
    #[serde(default = "default_conversion_timeout", with = "duration_serde")]
    pub conversion: Duration,

    /// Limit per merge or transcode invocation (default: 600 seconds)
    #[serde(default = "default_merge_timeout", with = "duration_serde")]
    pub merge: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            conversion: default_conversion_timeout(),
            merge: default_merge_timeout(),
        }
    }
}

/// Output directory layout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Root for per-book output directories (default: "output")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Suffix of the kept-chapters subdirectory (default: "_chapters")
    #[serde(default = "default_chapter_suffix")]
    pub chapter_suffix: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            chapter_suffix: default_chapter_suffix(),
        }
    }
}

/// Where the whitelisted executables are looked up
///
/// The set of executables is fixed; only the directories searched for them
/// can be changed.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directories searched instead of `PATH` (None = standard `PATH` search)
    #[serde(default)]
    pub search_dirs: Option<Vec<PathBuf>>,
}

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Voice, format and retention
    #[serde(default)]
    pub audio: AudioConfig,

    /// Concurrency, retries and failure threshold
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// External tool time limits
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Output layout
    #[serde(default)]
    pub directories: DirectoryConfig,

    /// Executable lookup
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Load a configuration file (JSON)
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load a configuration file, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Write the default configuration, refusing to clobber unless `force` is set
    pub fn write_default(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            return Err(Error::config(
                "config_file",
                format!("{} already exists", path.display()),
            ));
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&Self::default())?;
        std::fs::write(path, text)?;
        tracing::info!(path = %path.display(), "wrote default configuration");
        Ok(())
    }

    /// Check every setting, reporting all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Some(jobs) = self.processing.jobs
            && !(1..=MAX_JOBS).contains(&jobs)
        {
            errors.push(format!(
                "invalid jobs value: {jobs}. Must be between 1 and {MAX_JOBS}"
            ));
        }
        if self.timeouts.conversion.is_zero() {
            errors.push("invalid conversion timeout: must be positive".to_string());
        }
        if self.timeouts.merge.is_zero() {
            errors.push("invalid merge timeout: must be positive".to_string());
        }
        if self.audio.mp3_quality > MAX_QUALITY {
            errors.push(format!(
                "invalid mp3_quality: {}. Must be between 0 and {MAX_QUALITY}",
                self.audio.mp3_quality
            ));
        }
        let threshold = self.processing.failure_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            errors.push(format!(
                "invalid failure_threshold: {threshold}. Must be between 0 and 1"
            ));
        }
        if let Some(voice) = self.audio.voice.as_deref().filter(|v| !v.is_empty())
            && let Err(e) = Voice::parse(voice)
        {
            errors.push(format!("invalid voice: {e}"));
        }
        if self.directories.chapter_suffix.contains(['/', '\\']) {
            errors.push("invalid chapter_suffix: must not contain path separators".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Config {
                message: format!(
                    "validation failed:\n{}",
                    errors
                        .iter()
                        .map(|e| format!("  - {e}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                ),
                key: None,
            })
        }
    }

    /// Parallel job count with the CPU-based default applied
    pub fn resolved_jobs(&self) -> usize {
        self.processing.jobs.unwrap_or_else(default_jobs)
    }
}

/// Available processing units minus one, never less than one
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_failure_threshold() -> f64 {
    0.5
}

fn default_conversion_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_merge_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_chapter_suffix() -> String {
    "_chapters".to_string()
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
