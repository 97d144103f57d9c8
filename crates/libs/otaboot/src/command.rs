//! Execution of external commands.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use reportify::Report;
use thiserror::Error;
use tracing::{debug, info};

/// Interval for polling a running child process.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// External command consisting of a program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    program: String,
    args: Vec<String>,
}

impl Command {
    /// Create a command for the given program without arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Program to run.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the program.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Error running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unable to spawn command")]
    Spawn(#[source] io::Error),
    #[error("unable to wait for command")]
    Wait(#[source] io::Error),
    #[error("command exited unsuccessfully ({})", describe_code(.code))]
    Failed { code: Option<i32> },
    #[error("command timed out after {0:?}")]
    TimedOut(Duration),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_owned(),
    }
}

pub type CommandResult<T> = Result<T, Report<CommandError>>;

/// Capability to run external commands.
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion and return the raw bytes it wrote to `stdout`.
    ///
    /// An unsuccessful exit status is an error.
    fn run(&self, command: &Command) -> CommandResult<Vec<u8>>;
}

/// Runs commands as child processes of the current process.
///
/// Commands running longer than the timeout are killed.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    /// Create a runner with the given timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Timeout after which commands are killed.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, command: &Command) -> CommandResult<Vec<u8>> {
        debug!("running `{command}`");
        let mut child = std::process::Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| {
                Report::new(CommandError::Spawn(error)).with_context(format!("command: {command}"))
            })?;
        // Drain `stdout` concurrently so that a chatty child never blocks on a full pipe.
        let reader = child.stdout.take().map(|mut stdout| {
            thread::spawn(move || {
                let mut output = Vec::new();
                stdout.read_to_end(&mut output).map(|_| output)
            })
        });
        let status = wait_with_timeout(&mut child, self.timeout)
            .map_err(|report| report.with_context(format!("command: {command}")))?;
        let output = reader
            .and_then(|reader| reader.join().ok())
            .and_then(Result::ok)
            .unwrap_or_default();
        if !status.success() {
            return Err(Report::new(CommandError::Failed {
                code: status.code(),
            })
            .with_context(format!("command: {command}")));
        }
        Ok(output)
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> CommandResult<ExitStatus> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if start.elapsed() >= timeout => {
                child.kill().ok();
                child.wait().ok();
                return Err(Report::new(CommandError::TimedOut(timeout)));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(error) => return Err(Report::new(CommandError::Wait(error))),
        }
    }
}

/// Scripted reply of a [`RecordingRunner`].
#[derive(Debug, Clone)]
enum Reply {
    Output(Vec<u8>),
    Failure(i32),
}

#[derive(Debug, Default)]
struct Recording {
    commands: Vec<Command>,
    replies: HashMap<String, Reply>,
}

/// Runner that records commands instead of executing them.
///
/// Commands succeed with empty output unless a reply has been scripted for their
/// command line (as rendered by [`Command`]'s `Display` implementation). Used for dry
/// runs and for testing.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    recording: Mutex<Recording>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to the given command line with the given output.
    pub fn reply_with(&self, command_line: &str, output: impl Into<Vec<u8>>) {
        self.lock()
            .replies
            .insert(command_line.to_owned(), Reply::Output(output.into()));
    }

    /// Fail the given command line with the given exit code.
    pub fn fail_with(&self, command_line: &str, code: i32) {
        self.lock()
            .replies
            .insert(command_line.to_owned(), Reply::Failure(code));
    }

    /// Commands recorded so far.
    pub fn commands(&self) -> Vec<Command> {
        self.lock().commands.clone()
    }

    /// Command lines recorded so far.
    pub fn command_lines(&self) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .map(Command::to_string)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recording> {
        // The recording stays consistent even if a holder of the lock panicked.
        self.recording
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &Command) -> CommandResult<Vec<u8>> {
        info!("not executing `{command}`");
        let mut recording = self.lock();
        recording.commands.push(command.clone());
        match recording.replies.get(&command.to_string()) {
            Some(Reply::Output(output)) => Ok(output.clone()),
            Some(Reply::Failure(code)) => Err(Report::new(CommandError::Failed {
                code: Some(*code),
            })),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> SystemRunner {
        SystemRunner::new(Duration::from_secs(10))
    }

    #[test]
    fn test_command_display() {
        let command = Command::new("fw_setenv").arg("bootcount").arg("0");
        assert_eq!(command.to_string(), "fw_setenv bootcount 0");
        assert_eq!(command.program(), "fw_setenv");
        assert_eq!(command.args(), ["bootcount", "0"]);
    }

    #[test]
    fn test_system_runner_captures_stdout() {
        let output = runner()
            .run(&Command::new("echo").arg("bootfirmware_version=42"))
            .unwrap();
        assert_eq!(output, b"bootfirmware_version=42\n");
    }

    #[test]
    fn test_system_runner_keeps_raw_bytes() {
        let output = runner()
            .run(&Command::new("printf").arg("\\377\\376"))
            .unwrap();
        assert_eq!(output, [0xff_u8, 0xfe]);
    }

    #[test]
    fn test_system_runner_exit_code() {
        let report = runner().run(&Command::new("false")).unwrap_err();
        assert!(matches!(
            report.error(),
            CommandError::Failed { code: Some(1) }
        ));
    }

    #[test]
    fn test_system_runner_missing_program() {
        let report = runner()
            .run(&Command::new("/nonexistent/otaboot-test-program"))
            .unwrap_err();
        assert!(matches!(report.error(), CommandError::Spawn(_)));
    }

    #[test]
    fn test_system_runner_timeout() {
        let runner = SystemRunner::new(Duration::from_millis(100));
        let start = Instant::now();
        let report = runner.run(&Command::new("sleep").arg("5")).unwrap_err();
        assert!(matches!(report.error(), CommandError::TimedOut(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_recording_runner() {
        let runner = RecordingRunner::new();
        runner.reply_with("fw_printenv bootfirmware_version", "1\n");
        runner.fail_with("fw_setenv rollback 0", 1);
        assert_eq!(
            runner
                .run(&Command::new("fw_printenv").arg("bootfirmware_version"))
                .unwrap(),
            b"1\n"
        );
        assert!(runner
            .run(&Command::new("fw_setenv").arg("rollback").arg("0"))
            .is_err());
        assert_eq!(
            runner
                .run(&Command::new("fw_setenv").arg("bootcount").arg("0"))
                .unwrap(),
            b""
        );
        assert_eq!(
            runner.command_lines(),
            [
                "fw_printenv bootfirmware_version",
                "fw_setenv rollback 0",
                "fw_setenv bootcount 0"
            ]
        );
    }
}
