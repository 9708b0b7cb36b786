//! Utility functions for file naming, output directories and tool checks

use crate::config::OutputFormat;
use crate::error::{Error, Result};
use crate::process::{Executable, SecureProcessRunner};
use std::path::{Path, PathBuf};

/// Longest file name produced by [`sanitize_filename`]
pub const MAX_FILENAME_LEN: usize = 200;

/// Characters replaced with `_` in generated file names
///
/// Covers the characters process arguments refuse, so generated paths can
/// always be passed to the whitelisted tools.
const UNSAFE_FILENAME_CHARS: &[char] = &[
    '<', '>', ':', '"', '/', '\\', '|', '?', '*', ';', '&', '`', '$',
];

/// Make a name safe to use as a single path component
///
/// Any directory part is dropped, unsafe characters become `_`, leading and
/// trailing spaces and dots are trimmed, and the result is capped at
/// [`MAX_FILENAME_LEN`] characters with the extension preserved. An empty
/// result becomes `output`.
///
/// # Examples
///
/// ```
/// use epub2audio::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
/// assert_eq!(sanitize_filename("What If?: A Novel"), "What If__ A Novel");
/// assert_eq!(sanitize_filename(" ... "), "output");
/// ```
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let replaced: String = base
        .chars()
        .map(|c| {
            if UNSAFE_FILENAME_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "output".to_string();
    }

    if trimmed.chars().count() <= MAX_FILENAME_LEN {
        return trimmed.to_string();
    }

    let (stem, ext) = match trimmed.rfind('.') {
        Some(dot) if dot > 0 => trimmed.split_at(dot),
        _ => (trimmed, ""),
    };
    let keep = MAX_FILENAME_LEN.saturating_sub(ext.chars().count());
    let mut shortened: String = stem.chars().take(keep).collect();
    shortened.push_str(ext);
    shortened
}

/// File name of a chapter's segment: `chapter-0001.aiff` for index 0
///
/// Zero padding keeps lexicographic order equal to chapter order.
#[must_use]
pub fn segment_file_name(index: usize) -> String {
    format!(
        "chapter-{:04}.{}",
        index + 1,
        OutputFormat::Lossless.extension()
    )
}

/// Create `<base_dir>/<sanitized name>` and return it
pub async fn create_output_directory(base_dir: &Path, name: &str) -> Result<PathBuf> {
    let dir = base_dir.join(sanitize_filename(name));
    tokio::fs::create_dir_all(&dir).await?;

    let metadata = tokio::fs::metadata(&dir).await?;
    if metadata.permissions().readonly() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!("output directory {} is not writable", dir.display()),
        )));
    }

    Ok(dir)
}

/// Remove leftover lossless segment files from a chapter directory
///
/// Returns the number of files removed. A missing directory counts as empty.
pub async fn remove_stale_segments(dir: &Path) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let lossless = OutputFormat::Lossless.extension();
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_segment = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(lossless));
        if is_segment && entry.file_type().await?.is_file() {
            tokio::fs::remove_file(&path).await?;
            removed += 1;
        }
    }

    if removed > 0 {
        tracing::debug!(dir = %dir.display(), removed, "removed stale segment files");
    }
    Ok(removed)
}

/// Verify both whitelisted tools can be found
pub fn check_system_dependencies(runner: &SecureProcessRunner) -> Result<()> {
    let missing: Vec<String> = Executable::ALL
        .into_iter()
        .filter(|exe| runner.resolve(*exe).is_err())
        .map(|exe| match exe {
            Executable::SpeechSynth => {
                "'say' command not found (speech synthesis requires macOS)".to_string()
            }
            Executable::AudioTool => {
                "'ffmpeg' not found (install it, e.g. `brew install ffmpeg`)".to_string()
            }
        })
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::MissingDependency(missing.join("; ")))
    }
}
