//! Stand-ins for the whitelisted speech and audio tools
//!
//! Both are small `/bin/sh` scripts installed as `say` and `ffmpeg` in a
//! temporary directory the runner searches instead of `PATH`.
//!
//! - `say` writes `[<chapter text>]` as the segment. Text containing `FAIL`
//!   exits 1; text containing `SLOW` sleeps first.
//! - `ffmpeg` concatenates the listed segments byte for byte, or for a
//!   transcode writes `MP3:` followed by the input.
//!
//! Each invocation appends one line to `say.log` / `ffmpeg.log`.

use epub2audio::SecureProcessRunner;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const SAY_SCRIPT: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    -f) input="$2"; shift 2 ;;
    -o) output="$2"; shift 2 ;;
    -v) voice="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf 'voice=%s output=%s\n' "${voice:-}" "$(basename "$output")" >> '@LOG@/say.log'
text=$(cat "$input")
case "$text" in
  *SLOW*) sleep 0.2 ;;
esac
case "$text" in
  *FAIL*) echo "voice synthesis failed for $output" >&2; exit 1 ;;
esac
printf '[%s]' "$text" > "$output"
"#;

const FFMPEG_SCRIPT: &str = r#"
mode=transcode
while [ $# -gt 0 ]; do
  case "$1" in
    -f) mode=concat; shift 2 ;;
    -i) input="$2"; shift 2 ;;
    -y) output="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf '%s %s %s\n' "$mode" "$input" "$output" >> '@LOG@/ffmpeg.log'
if [ "$mode" = concat ]; then
  : > "$output"
  while IFS= read -r line; do
    path=${line#file \'}
    path=${path%\'}
    cat "$path" >> "$output" || exit 1
  done < "$input"
else
  printf 'MP3:' > "$output"
  cat "$input" >> "$output"
fi
"#;

/// A temporary directory holding the fake tools and their call logs
pub struct FakeTools {
    dir: TempDir,
}

impl FakeTools {
    /// Install both tools
    pub fn install() -> Self {
        let dir = TempDir::new().expect("create tool directory");
        let log_dir = dir.path().to_string_lossy().into_owned();
        write_script(dir.path(), "say", &SAY_SCRIPT.replace("@LOG@", &log_dir));
        write_script(dir.path(), "ffmpeg", &FFMPEG_SCRIPT.replace("@LOG@", &log_dir));
        Self { dir }
    }

    /// Directory the tools live in
    pub fn bin_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Runner that resolves tools only from this directory
    pub fn runner(&self) -> Arc<SecureProcessRunner> {
        Arc::new(SecureProcessRunner::with_search_dirs(vec![
            self.dir.path().to_path_buf(),
        ]))
    }

    /// One line per speech-tool invocation: `voice=<v> output=<segment file>`
    pub fn say_calls(&self) -> Vec<String> {
        read_log(&self.dir.path().join("say.log"))
    }

    /// One line per audio-tool invocation: `<concat|transcode> <input> <output>`
    pub fn ffmpeg_calls(&self) -> Vec<String> {
        read_log(&self.dir.path().join("ffmpeg.log"))
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write tool script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("make tool executable");
    path
}

fn read_log(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|log| log.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
