//! Helpers for launching the external tools driven by the pipeline.
//!
//! Every stage shells out (ffmpeg, DanmakuFactory, biliup), so spawning and
//! output capture live here instead of being repeated per stage.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
pub use capture::{CapturedOutput, run_captured};

#[cfg(feature = "tokio")]
mod capture {
    use std::process::{ExitStatus, Stdio};
    use std::time::{Duration, Instant};

    use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
    use tokio::process::Command;
    use tokio::task::JoinHandle;
    use tracing::debug;

    /// Exit status and line-buffered output of a finished child process.
    #[derive(Debug)]
    pub struct CapturedOutput {
        pub status: ExitStatus,
        pub duration: Duration,
        pub stdout: Vec<String>,
        pub stderr: Vec<String>,
    }

    impl CapturedOutput {
        pub fn success(&self) -> bool {
            self.status.success()
        }

        /// Last non-empty stderr line, handy for short failure reasons.
        pub fn last_stderr_line(&self) -> Option<&str> {
            self.stderr
                .iter()
                .rev()
                .map(|l| l.trim())
                .find(|l| !l.is_empty())
        }
    }

    fn collect_lines<R>(reader: R, stream: &'static str) -> JoinHandle<Vec<String>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let mut out = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(stream, "{}", line);
                out.push(line);
            }
            out
        })
    }

    /// Run `command` to completion, capturing stdout and stderr.
    ///
    /// Stdin is closed so tools that prompt cannot hang the pipeline.
    pub async fn run_captured(command: &mut Command) -> std::io::Result<CapturedOutput> {
        let start = Instant::now();

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;

        let stdout_task = child.stdout.take().map(|s| collect_lines(s, "stdout"));
        let stderr_task = child.stderr.take().map(|s| collect_lines(s, "stderr"));

        let status = child.wait().await?;

        let stdout = match stdout_task {
            Some(task) => task.await.map_err(std::io::Error::other)?,
            None => Vec::new(),
        };
        let stderr = match stderr_task {
            Some(task) => task.await.map_err(std::io::Error::other)?,
            None => Vec::new(),
        };

        Ok(CapturedOutput {
            status,
            duration: start.elapsed(),
            stdout,
            stderr,
        })
    }
}
