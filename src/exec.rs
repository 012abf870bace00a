//! External command execution
//!
//! Every `mount`, `umount`, `mkfs.*`, freeze/thaw, `aws` and `curl`
//! invocation goes through a [`CommandRunner`]. The production runner spawns
//! real processes; tests substitute a recorder.
//!
//! # Contract
//!
//! - Arguments are passed as an argv list, never through a shell.
//! - stdout and stderr are both captured.
//! - A non-zero exit is an error that carries the combined output.

use std::fmt;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
}

impl CommandOutput {
    /// Output with only stdout, the common case for fakes.
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Errors raised by a [`CommandRunner`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The program could not be started at all (usually not on PATH)
    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    /// The program ran and exited unsuccessfully
    #[error("{} failed (exit code {}): {output}", command_line(.program, .args), .code.unwrap_or(-1))]
    Failed {
        program: String,
        args: Vec<String>,
        /// None if terminated by signal
        code: Option<i32>,
        output: String,
    },
}

impl CommandError {
    /// The captured output, or the spawn message when nothing ran.
    pub fn output(&self) -> &str {
        match self {
            Self::Spawn { message, .. } => message,
            Self::Failed { output, .. } => output,
        }
    }
}

/// Process-execution capability.
pub trait CommandRunner {
    /// Run `program` with `args` to completion.
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
        debug!(command = %command_line(program, args), "running command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| CommandError::Spawn {
                program: program.to_string(),
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            Err(CommandError::Failed {
                program: program.to_string(),
                args: args.to_vec(),
                code: output.status.code(),
                output: combine(&stdout, &stderr),
            })
        }
    }
}

fn command_line(program: &str, args: &[String]) -> String {
    CommandLine { program, args }.to_string()
}

fn combine(stdout: &str, stderr: &str) -> String {
    match (stdout.trim(), stderr.trim()) {
        ("", err) => err.to_string(),
        (out, "") => out.to_string(),
        (out, err) => format!("{}\n{}", out, err),
    }
}

/// Display helper: `program arg1 arg2`
struct CommandLine<'a> {
    program: &'a str,
    args: &'a [String],
}

impl fmt::Display for CommandLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
