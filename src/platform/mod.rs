use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use wait_timeout::ChildExt;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Boundary to the cloud vendors' command line clients.
///
/// Implementations must not interpret the output; providers decide what a
/// non-zero exit status means.
pub trait CommandRunner: Send + Sync {
    fn run(&self, cmd: &str, args: &[String], env: &[(String, String)]) -> Result<CommandOutput>;
}

#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, cmd: &str, args: &[String], env: &[(String, String)]) -> Result<CommandOutput> {
        run_command_with_env(cmd, args, env, self.timeout)
    }
}

pub fn run_command_with_env(
    cmd: &str,
    args: &[String],
    env: &[(String, String)],
    timeout: Duration,
) -> Result<CommandOutput> {
    let mut command = Command::new(cmd);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    for (k, v) in env {
        command.env(k, v);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start process: {cmd}"))?;

    // Drain both pipes while waiting; large JSON listings would otherwise
    // fill the pipe buffer and stall the child until the timeout.
    let stdout_reader = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = out.read_to_string(&mut buf);
            buf
        })
    });
    let stderr_reader = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = err.read_to_string(&mut buf);
            buf
        })
    });

    let status = match child
        .wait_timeout(timeout)
        .with_context(|| format!("failed to wait for process: {cmd}"))?
    {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("timed out after {timeout:?}: {cmd}"));
        }
    };

    let stdout = stdout_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

pub fn effective_home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("HOME is not set"))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn run_command_captures_stdout_and_exit_code() {
        let out = run_command_with_env(
            "sh",
            &["-c".to_string(), "printf hello; exit 3".to_string()],
            &[],
            Duration::from_secs(10),
        )
        .expect("run sh");
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.exit_code, 3);
    }

    #[cfg(unix)]
    #[test]
    fn run_command_passes_env() {
        let out = run_command_with_env(
            "sh",
            &["-c".to_string(), "printf \"$NETSEC_TEST_VAR\"".to_string()],
            &[("NETSEC_TEST_VAR".to_string(), "v1".to_string())],
            Duration::from_secs(10),
        )
        .expect("run sh");
        assert_eq!(out.stdout, "v1");
    }

    #[cfg(unix)]
    #[test]
    fn run_command_times_out() {
        let err = run_command_with_env(
            "sh",
            &["-c".to_string(), "sleep 5".to_string()],
            &[],
            Duration::from_millis(100),
        )
        .expect_err("should time out");
        assert!(err.to_string().contains("timed out"), "err={err}");
    }

    #[test]
    fn missing_binary_is_an_error() {
        let err = run_command_with_env(
            "netsec-cloud-definitely-missing-binary",
            &[],
            &[],
            Duration::from_secs(1),
        )
        .expect_err("spawn should fail");
        assert!(err.to_string().contains("failed to start process"));
    }
}
