//! Sandboxed execution of the two whitelisted external tools
//!
//! ## Architecture
//!
//! - [`Executable`] is the fixed whitelist: a speech-synthesis tool and an
//!   audio-processing tool, each with its own allowed flags and argument limit.
//! - [`ProcessSpec`] is built fresh per invocation; every argument is
//!   validated as it is added, so an invalid spec cannot be constructed.
//! - [`ProcessRunner`] is the execution seam. [`SecureProcessRunner`] runs
//!   the spec by direct argument-vector invocation (no shell) with a minimal
//!   environment and a hard timeout.
//!
//! ## Usage
//!
//! ```no_run
//! use epub2audio::process::{Executable, ProcessRunner, ProcessSpec, SecureProcessRunner};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let spec = ProcessSpec::new(Executable::AudioTool, Duration::from_secs(5)).arg("-version")?;
//! let output = SecureProcessRunner::new().run(&spec).await?;
//! println!("{}", output.stdout_lossy());
//! # Ok(())
//! # }
//! ```

mod runner;
mod sanitize;

pub use runner::{SecureProcessRunner, secure_environment};
pub use sanitize::{MAX_ARGUMENT_LEN, MAX_VOICE_LEN, Voice, validate_argument};

use crate::error::{ArgumentViolation, ProcessError};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// The fixed set of executables the crate may invoke
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Executable {
    /// Speech synthesis (`say`)
    SpeechSynth,
    /// Audio concatenation and transcoding (`ffmpeg`)
    AudioTool,
}

/// Flags and argument count an executable may receive
struct ArgumentPolicy {
    allowed_flags: &'static [&'static str],
    max_args: usize,
}

const SPEECH_POLICY: ArgumentPolicy = ArgumentPolicy {
    allowed_flags: &[
        "-v",
        "-o",
        "-f",
        "-r",
        "--file-format",
        "--data-format",
        "--channels",
        "--bit-rate",
        "--quality",
    ],
    max_args: 20,
};

const AUDIO_POLICY: ArgumentPolicy = ArgumentPolicy {
    allowed_flags: &["-f", "-i", "-c", "-safe", "-y", "-q:a", "-version"],
    max_args: 50,
};

impl Executable {
    /// Every whitelisted executable
    pub const ALL: [Executable; 2] = [Executable::SpeechSynth, Executable::AudioTool];

    /// Name looked up on the executable search path
    pub fn program_name(&self) -> &'static str {
        match self {
            Executable::SpeechSynth => "say",
            Executable::AudioTool => "ffmpeg",
        }
    }

    /// Map a program name onto the whitelist
    pub fn from_name(name: &str) -> Result<Self, ProcessError> {
        Self::ALL
            .into_iter()
            .find(|e| e.program_name() == name)
            .ok_or_else(|| ProcessError::DisallowedExecutable {
                name: name.to_string(),
            })
    }

    fn policy(&self) -> &'static ArgumentPolicy {
        match self {
            Executable::SpeechSynth => &SPEECH_POLICY,
            Executable::AudioTool => &AUDIO_POLICY,
        }
    }

    /// Whether `flag` is on this executable's flag list
    pub fn allows_flag(&self, flag: &str) -> bool {
        self.policy().allowed_flags.contains(&flag)
    }

    /// Maximum number of arguments
    pub fn max_args(&self) -> usize {
        self.policy().max_args
    }
}

impl std::fmt::Display for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.program_name())
    }
}

/// A validated invocation of a whitelisted executable
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessSpec {
    executable: Executable,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessSpec {
    /// Start a spec with no arguments
    pub fn new(executable: Executable, timeout: Duration) -> Self {
        Self {
            executable,
            args: Vec::new(),
            timeout,
        }
    }

    /// Append a validated argument
    ///
    /// Arguments beginning with `-` must be flags this executable allows.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Result<Self, ProcessError> {
        let arg = arg.as_ref();
        let reject = |violation| ProcessError::InvalidArgument {
            argument: arg.escape_debug().to_string(),
            violation,
        };

        validate_argument(arg).map_err(reject)?;

        if arg.starts_with('-') && !self.executable.allows_flag(arg) {
            return Err(reject(ArgumentViolation::DisallowedFlag(arg.to_string())));
        }

        let max = self.executable.max_args();
        if self.args.len() >= max {
            return Err(reject(ArgumentViolation::TooManyArguments {
                count: self.args.len() + 1,
                max,
            }));
        }

        self.args.push(arg.to_string());
        Ok(self)
    }

    /// Append a validated path argument
    pub fn path_arg(self, path: &Path) -> Result<Self, ProcessError> {
        let text = path.to_str().ok_or_else(|| ProcessError::InvalidArgument {
            argument: path.to_string_lossy().into_owned(),
            violation: ArgumentViolation::NotUnicode,
        })?;
        self.arg(text)
    }

    /// Replace the wall-clock limit
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The executable to run
    pub fn executable(&self) -> Executable {
        self.executable
    }

    /// Validated arguments, in order
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Wall-clock limit
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Captured result of a successful process run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code (always 0 for a successful run)
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: Vec<u8>,
    /// Captured standard error
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    /// Standard output decoded lossily
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Standard error decoded lossily
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Executes validated process specs
///
/// A non-zero exit is returned as [`ProcessError::ProcessFailed`]; the
/// caller decides whether to retry. Implementations must not leave a child
/// process running when `run` returns.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run the spec to completion or timeout
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError>;
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const T: Duration = Duration::from_secs(1);

    #[test]
    fn whitelist_maps_names() {
        assert_eq!(Executable::from_name("say").unwrap(), Executable::SpeechSynth);
        assert_eq!(Executable::from_name("ffmpeg").unwrap(), Executable::AudioTool);
        for name in ["rm", "sh", "/bin/sh", "ffmpeg ", "SAY", ""] {
            assert!(
                matches!(
                    Executable::from_name(name),
                    Err(ProcessError::DisallowedExecutable { .. })
                ),
                "{name:?} must be rejected"
            );
        }
    }

    #[test]
    fn builder_keeps_argument_order() {
        let spec = ProcessSpec::new(Executable::AudioTool, T)
            .arg("-f")
            .unwrap()
            .arg("concat")
            .unwrap()
            .path_arg(Path::new("/tmp/list.txt"))
            .unwrap();
        assert_eq!(spec.args(), ["-f", "concat", "/tmp/list.txt"]);
        assert_eq!(spec.executable(), Executable::AudioTool);
        assert_eq!(spec.timeout(), T);
    }

    #[test]
    fn dangerous_arguments_are_rejected_for_every_executable() {
        for executable in Executable::ALL {
            for bad in ["a;b", "a`b", "a|b", "a&b", "a\0b"] {
                let err = ProcessSpec::new(executable, T).arg(bad).unwrap_err();
                assert!(
                    matches!(
                        err,
                        ProcessError::InvalidArgument {
                            violation: ArgumentViolation::ForbiddenCharacter(_),
                            ..
                        }
                    ),
                    "{executable}: {bad:?} gave {err:?}"
                );
            }
        }
    }

    #[test]
    fn null_byte_is_escaped_in_error() {
        let err = ProcessSpec::new(Executable::SpeechSynth, T)
            .arg("a\0b")
            .unwrap_err();
        match err {
            ProcessError::InvalidArgument { argument, .. } => {
                assert!(!argument.contains('\0'));
                assert!(argument.contains("\\0"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn flags_are_checked_per_executable() {
        assert!(ProcessSpec::new(Executable::SpeechSynth, T).arg("-v").is_ok());
        assert!(ProcessSpec::new(Executable::AudioTool, T).arg("-q:a").is_ok());

        // -v is a speech flag, not an audio-tool flag
        let err = ProcessSpec::new(Executable::AudioTool, T)
            .arg("-v")
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::InvalidArgument {
                violation: ArgumentViolation::DisallowedFlag(_),
                ..
            }
        ));

        assert!(
            ProcessSpec::new(Executable::AudioTool, T)
                .arg("-filter_complex")
                .is_err()
        );
    }

    #[test]
    fn argument_count_is_capped() {
        let mut spec = ProcessSpec::new(Executable::SpeechSynth, T);
        for i in 0..Executable::SpeechSynth.max_args() {
            spec = spec.arg(format!("word{i}")).unwrap();
        }
        let err = spec.arg("one-too-many").unwrap_err();
        assert!(matches!(
            err,
            ProcessError::InvalidArgument {
                violation: ArgumentViolation::TooManyArguments { count: 21, max: 20 },
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn non_unicode_path_is_rejected() {
        use std::os::unix::ffi::OsStrExt;
        let path = PathBuf::from(std::ffi::OsStr::from_bytes(b"/tmp/\xff.aiff"));
        let err = ProcessSpec::new(Executable::AudioTool, T)
            .path_arg(&path)
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::InvalidArgument {
                violation: ArgumentViolation::NotUnicode,
                ..
            }
        ));
    }

    #[test]
    fn output_lossy_decoding() {
        let output = ProcessOutput {
            exit_code: 0,
            stdout: b"ffmpeg version 6".to_vec(),
            stderr: vec![0xff, b'x'],
        };
        assert_eq!(output.stdout_lossy(), "ffmpeg version 6");
        assert!(output.stderr_lossy().ends_with('x'));
    }
}
