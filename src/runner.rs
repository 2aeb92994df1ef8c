use std::fmt;
use std::io;
use std::path::Path;
use std::process::Command;

/// Captured result of one subprocess invocation.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub success: bool,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// A single failed invocation of the InMAP executable.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to invoke {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("exited with code {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
}

/// Runs the InMAP executable.
///
/// Every call is a short-lived, independent subprocess; there is no
/// persistent connection to the cloud service. The trait exists so tests
/// (and embedders with their own process supervision) can substitute the
/// real executable.
pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Runs `program` with `args` in `cwd`, waiting for it to exit and
    /// capturing both output streams.
    fn run(&self, program: &Path, args: &[String], cwd: &Path) -> io::Result<RunOutput>;
}

/// [`CommandRunner`] backed by [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[String], cwd: &Path) -> io::Result<RunOutput> {
        let output = Command::new(program).args(args).current_dir(cwd).output()?;
        Ok(RunOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Converts a finished invocation into its stdout, or a [`CommandError`]
/// carrying the exit code and captured stderr.
pub(crate) fn require_success(output: RunOutput) -> Result<String, CommandError> {
    if output.success {
        Ok(output.stdout_text())
    } else {
        Err(CommandError::Failed {
            code: output.code,
            stderr: output.stderr_text().trim().to_string(),
        })
    }
}
