//! Sandboxed process execution

use super::{Executable, ProcessOutput, ProcessRunner, ProcessSpec};
use crate::config::ToolsConfig;
use crate::error::ProcessError;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Lines of standard error kept in a failure report
const STDERR_TAIL_LINES: usize = 10;

/// Spawn attempts when the executable is momentarily busy
const SPAWN_ATTEMPTS: u32 = 3;

/// Environment passed to every child; nothing else is inherited
///
/// `PATH`, `HOME` and `USER` come from the current process when set;
/// the locale defaults to `en_US.UTF-8`.
pub fn secure_environment() -> Vec<(&'static str, String)> {
    let inherit = |key: &str, fallback: &str| {
        std::env::var(key).unwrap_or_else(|_| fallback.to_string())
    };

    vec![
        ("PATH", inherit("PATH", "")),
        ("HOME", inherit("HOME", "")),
        ("USER", inherit("USER", "")),
        ("LANG", inherit("LANG", "en_US.UTF-8")),
        ("LC_ALL", inherit("LC_ALL", "en_US.UTF-8")),
    ]
}

/// Runs whitelisted executables with validated arguments
///
/// Each invocation is a direct argument-vector spawn, never a shell. The
/// child gets a cleared environment (see [`secure_environment`]), a null
/// stdin, and its own process group so a timeout can kill everything it
/// started.
///
/// # Examples
///
/// ```no_run
/// use epub2audio::process::{Executable, ProcessRunner, ProcessSpec, SecureProcessRunner};
/// use std::path::PathBuf;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// // Only look for tools in a specific directory
/// let runner = SecureProcessRunner::with_search_dirs(vec![PathBuf::from("/opt/homebrew/bin")]);
/// let spec = ProcessSpec::new(Executable::SpeechSynth, Duration::from_secs(300))
///     .arg("-f")?
///     .arg("/tmp/input.txt")?
///     .arg("-o")?
///     .arg("/tmp/chapter-0001.aiff")?;
/// runner.run(&spec).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct SecureProcessRunner {
    search_dirs: Option<Vec<PathBuf>>,
}

impl SecureProcessRunner {
    /// Resolve executables from the process `PATH`
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve executables only from the given directories
    pub fn with_search_dirs(dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs: Some(dirs),
        }
    }

    /// Build a runner from the tool settings
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self {
            search_dirs: config.search_dirs.clone(),
        }
    }

    /// Locate a whitelisted executable
    pub fn resolve(&self, executable: Executable) -> Result<PathBuf, ProcessError> {
        let name = executable.program_name();
        let found = match &self.search_dirs {
            Some(dirs) => {
                let paths = std::env::join_paths(dirs).map_err(|e| {
                    ProcessError::io(
                        "invalid tool search directory",
                        io::Error::new(io::ErrorKind::InvalidInput, e),
                    )
                })?;
                let cwd = std::env::current_dir()
                    .map_err(|e| ProcessError::io("failed to read current directory", e))?;
                which::which_in(name, Some(paths), cwd)
            }
            None => which::which(name),
        };

        found.map_err(|_| ProcessError::NotFound { executable })
    }

    fn command(program: &Path, spec: &ProcessSpec) -> Command {
        let mut command = Command::new(program);
        command
            .args(spec.args())
            .env_clear()
            .envs(secure_environment())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        command
    }

    async fn spawn(program: &Path, spec: &ProcessSpec) -> Result<Child, ProcessError> {
        let mut attempt = 1;
        loop {
            match Self::command(program, spec).spawn() {
                Ok(child) => return Ok(child),
                Err(e) if is_text_busy(&e) && attempt < SPAWN_ATTEMPTS => {
                    tracing::debug!(
                        program = %program.display(),
                        attempt,
                        "executable busy, retrying spawn"
                    );
                    tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(ProcessError::io(
                        format!("failed to spawn {}", spec.executable()),
                        e,
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for SecureProcessRunner {
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
        let executable = spec.executable();
        let program = self.resolve(executable)?;

        tracing::debug!(
            executable = %executable,
            program = %program.display(),
            args = ?spec.args(),
            timeout_secs = spec.timeout().as_secs_f64(),
            "running process"
        );

        let mut child = Self::spawn(&program, spec).await?;
        let pid = child.id();

        let stdout = child.stdout.take().map(|pipe| tokio::spawn(read_pipe(pipe)));
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_pipe(pipe)));

        let status = match tokio::time::timeout(spec.timeout(), child.wait()).await {
            Ok(status) => status
                .map_err(|e| ProcessError::io(format!("failed to wait on {executable}"), e))?,
            Err(_) => {
                tracing::warn!(
                    executable = %executable,
                    timeout_secs = spec.timeout().as_secs_f64(),
                    "process timed out, killing process group"
                );
                kill_group(pid);
                if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "child already gone after timeout");
                }
                abort_reader(stdout);
                abort_reader(stderr);
                return Err(ProcessError::Timeout {
                    executable,
                    timeout: spec.timeout(),
                });
            }
        };

        // Anything the tool left running in its group goes too
        kill_group(pid);

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;

        if !status.success() {
            let stderr_tail = tail_lines(&String::from_utf8_lossy(&stderr), STDERR_TAIL_LINES);
            tracing::debug!(
                executable = %executable,
                exit_code = ?status.code(),
                stderr = %stderr_tail,
                "process exited unsuccessfully"
            );
            return Err(ProcessError::ProcessFailed {
                exit_code: status.code(),
                executable,
                stderr_tail,
            });
        }

        Ok(ProcessOutput {
            exit_code: status.code().unwrap_or(0),
            stdout,
            stderr,
        })
    }
}

async fn read_pipe<R>(mut pipe: R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf).await?;
    Ok(buf)
}

async fn collect(reader: Option<JoinHandle<io::Result<Vec<u8>>>>) -> Vec<u8> {
    match reader {
        Some(handle) => match handle.await {
            Ok(Ok(buf)) => buf,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "failed to read process output");
                Vec::new()
            }
            Err(e) => {
                tracing::debug!(error = %e, "output reader task failed");
                Vec::new()
            }
        },
        None => Vec::new(),
    }
}

fn abort_reader(reader: Option<JoinHandle<io::Result<Vec<u8>>>>) {
    if let Some(handle) = reader {
        handle.abort();
    }
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

#[cfg(unix)]
fn is_text_busy(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::ETXTBSY)
}

#[cfg(not(unix))]
fn is_text_busy(_e: &io::Error) -> bool {
    false
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };

    // SAFETY: killpg takes no pointers. The group was created for this
    // child by process_group(0), so its id equals the child's pid.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::debug!(pgid, error = %err, "failed to signal process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}
