//! Running external tools (ffmpeg, ffprobe) as bounded subprocesses.
//!
//! Every invocation has a deadline. A tool that overruns it is killed and
//! reported as [`Error::Timeout`]; a tool that exits non-zero is reported as
//! [`Error::ConversionFailure`] carrying the end of its stderr.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::process::Command;
use wm_core::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest stderr excerpt carried in an error message.
const MAX_DIAGNOSTIC_CHARS: usize = 2000;

/// Flags every ffmpeg invocation starts with: quiet banner, never read
/// stdin, overwrite the destination.
const FFMPEG_PROLOGUE: &[&str] = &["-hide_banner", "-nostdin", "-y"];

/// What a finished tool left behind.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// One pending invocation of an external tool.
///
/// ```no_run
/// use std::time::Duration;
/// use wm_av::ToolCommand;
///
/// # async fn example() -> wm_core::Result<()> {
/// ToolCommand::ffmpeg("/usr/bin/ffmpeg")
///     .args(["-i", "mix.wav", "-c:a", "libmp3lame", "song.mp3"])
///     .operation("transcode")
///     .timeout(Duration::from_secs(60))
///     .execute()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    operation: Option<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            operation: None,
        }
    }

    /// An ffmpeg invocation with the standard non-interactive flags already
    /// in place.
    pub fn ffmpeg(path: impl Into<PathBuf>) -> Self {
        Self::new(path).args(FFMPEG_PROLOGUE.iter().copied())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name used for this run in timeouts and logs, e.g. `"transcode"`.
    /// Defaults to the program's file name.
    pub fn operation(mut self, name: impl Into<String>) -> Self {
        self.operation = Some(name.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    /// Run to completion, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the deadline passes; the child is killed.
    /// - [`Error::ConversionFailure`] if the tool cannot be spawned or exits
    ///   non-zero.
    pub async fn execute(self) -> wm_core::Result<ToolOutput> {
        let tool = self.tool_name();
        let operation = self.operation.clone().unwrap_or_else(|| tool.clone());

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::conversion(&tool, None, format!("failed to spawn: {e}")))?;

        tracing::debug!(tool = %tool, operation = %operation, args = ?self.args, "tool started");
        let started = Instant::now();

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::conversion(
                    &tool,
                    None,
                    format!("lost track of the process: {e}"),
                ))
            }
            Err(_) => {
                // Dropping the wait future dropped the child, which kills it.
                tracing::warn!(tool = %tool, operation = %operation, after = ?self.timeout, "tool killed");
                return Err(Error::timeout(operation, self.timeout));
            }
        };

        let out = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: started.elapsed(),
        };
        tracing::debug!(
            tool = %tool,
            operation = %operation,
            code = ?out.status.code(),
            elapsed_ms = out.elapsed.as_millis() as u64,
            "tool finished"
        );

        if !out.status.success() {
            return Err(Error::conversion(
                tool,
                out.status.code(),
                diagnostic_tail(&out.stderr),
            ));
        }
        Ok(out)
    }
}

/// The end of a tool's stderr, where the actual error usually is.
fn diagnostic_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= MAX_DIAGNOSTIC_CHARS {
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - MAX_DIAGNOSTIC_CHARS).collect();
    format!("...{tail}")
}
