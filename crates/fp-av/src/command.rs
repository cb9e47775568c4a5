//! Builder for external tool invocations.
//!
//! [`ToolCommand::execute`] runs a short-lived command to completion under a
//! timeout; [`ToolCommand::spawn_piped`] starts a long-lived process (frame
//! decoders, encoders) with all three stdio streams piped.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use fp_core::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

/// Default timeout for short-lived commands.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Output captured from a completed tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    /// Captured stdout (lossy UTF-8).
    pub stdout: String,
    /// Captured stderr (lossy UTF-8).
    pub stderr: String,
}

/// A command line for ffmpeg or ffprobe.
///
/// ```no_run
/// use fp_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> fp_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .args(["-hide_banner", "-encoders"])
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    stdin_data: Option<Vec<u8>>,
}

impl ToolCommand {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            stdin_data: None,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Maximum run time for [`execute`](Self::execute).
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Data written to stdin by [`execute`](Self::execute).
    pub fn stdin(&mut self, data: Vec<u8>) -> &mut Self {
        self.stdin_data = Some(data);
        self
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Basename of the program, used in error messages.
    pub fn program_name(&self) -> String {
        program_name(&self.program)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        cmd
    }

    /// Run to completion, capturing stdout and stderr.
    ///
    /// Spawn failures, timeouts and non-zero exits are all
    /// [`fp_core::Error::Tool`].
    pub async fn execute(&self) -> fp_core::Result<ToolOutput> {
        let name = self.program_name();
        let mut cmd = self.command();
        if self.stdin_data.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        tracing::trace!(tool = %name, args = ?self.args, "executing");
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::tool(&name, format!("failed to spawn: {e}")))?;

        if let Some(data) = &self.stdin_data {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(data)
                    .await
                    .map_err(|e| Error::tool(&name, format!("failed to write stdin: {e}")))?;
            }
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::tool(name, format!("I/O error waiting for process: {e}")))
            }
            // The child is killed when the cancelled future drops it.
            Err(_) => return Err(Error::tool(name, format!("timed out after {:?}", self.timeout))),
        };

        let out = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        if !out.status.success() {
            return Err(Error::tool(
                name,
                format!("exited with status {}: {}", out.status, out.stderr.trim()),
            ));
        }
        Ok(out)
    }

    /// Start the process with piped stdin, stdout and stderr.
    ///
    /// The child is killed if the handle is dropped.
    pub fn spawn_piped(&self) -> fp_core::Result<Child> {
        let name = self.program_name();
        tracing::debug!(tool = %name, args = ?self.args, "spawning");
        self.command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::tool(name, format!("failed to spawn: {e}")))
    }
}

pub(crate) fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string_lossy().to_string())
}
