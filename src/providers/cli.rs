use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use crate::platform::CommandRunner;

const MAX_STDERR_CHARS: usize = 600;

/// A vendor CLI invocation that exited non-zero.
#[derive(Debug, Clone)]
pub struct CommandFailed {
    pub program: String,
    pub args: Vec<String>,
    pub exit_code: i32,
    pub stderr: String,
}

impl CommandFailed {
    /// True when the vendor error text mentions `code`.
    pub fn mentions(&self, code: &str) -> bool {
        self.stderr.contains(code)
    }
}

impl fmt::Display for CommandFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subcommand: Vec<&str> = self
            .args
            .iter()
            .take_while(|a| !a.starts_with("--"))
            .map(String::as_str)
            .collect();
        write!(
            f,
            "`{} {}` exited with {}",
            self.program,
            subcommand.join(" "),
            self.exit_code
        )?;
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            let clipped: String = stderr.chars().take(MAX_STDERR_CHARS).collect();
            write!(f, ": {clipped}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CommandFailed {}

/// True when `err` is a vendor CLI failure whose stderr mentions `code`.
pub fn error_mentions(err: &anyhow::Error, code: &str) -> bool {
    err.downcast_ref::<CommandFailed>()
        .is_some_and(|failed| failed.mentions(code))
}

/// One authenticated vendor CLI: program name, per-instance environment and
/// the arguments appended to every call (output format, profile, project...).
#[derive(Clone)]
pub struct CliSession {
    program: &'static str,
    runner: Arc<dyn CommandRunner>,
    env: Vec<(String, String)>,
    trailing_args: Vec<String>,
}

impl CliSession {
    pub fn new(program: &'static str, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program,
            runner,
            env: Vec::new(),
            trailing_args: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    pub fn with_trailing_args(mut self, args: &[&str]) -> Self {
        self.trailing_args
            .extend(args.iter().map(|a| (*a).to_string()));
        self
    }

    /// Runs the command and returns raw stdout.
    pub fn run(&self, args: &[&str]) -> Result<String> {
        let mut full: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        full.extend(self.trailing_args.iter().cloned());

        let output = self.runner.run(self.program, &full, &self.env)?;
        if output.exit_code != 0 {
            return Err(CommandFailed {
                program: self.program.to_string(),
                args: full,
                exit_code: output.exit_code,
                stderr: output.stderr,
            }
            .into());
        }
        Ok(output.stdout)
    }

    /// Runs the command and decodes stdout as JSON. Empty output decodes as
    /// JSON `null`, which some list/get commands print nothing for.
    pub fn json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let stdout = self.run(args)?;
        let text = if stdout.trim().is_empty() {
            "null"
        } else {
            stdout.as_str()
        };
        serde_json::from_str(text).with_context(|| {
            format!(
                "failed to parse JSON output of `{} {}`",
                self.program,
                args.join(" ")
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::ScriptedRunner;

    #[derive(serde::Deserialize)]
    struct Identity {
        #[serde(rename = "Account")]
        account: String,
    }

    #[test]
    fn json_appends_trailing_args_and_decodes() {
        let runner = Arc::new(
            ScriptedRunner::new().ok("aws sts get-caller-identity", r#"{"Account":"123"}"#),
        );
        let session = CliSession::new("aws", runner.clone())
            .with_trailing_args(&["--output", "json"])
            .with_env("AWS_PAGER", "");

        let identity: Identity = session
            .json(&["sts", "get-caller-identity"])
            .expect("identity");
        assert_eq!(identity.account, "123");
        assert_eq!(
            runner.calls(),
            vec!["aws sts get-caller-identity --output json".to_string()]
        );
        assert_eq!(
            runner.envs()[0],
            vec![("AWS_PAGER".to_string(), String::new())]
        );
    }

    #[test]
    fn non_zero_exit_is_command_failed() {
        let runner = Arc::new(ScriptedRunner::new().fail(
            "aws s3api get-bucket-encryption",
            "An error occurred (ServerSideEncryptionConfigurationNotFoundError) when calling the GetBucketEncryption operation",
        ));
        let session = CliSession::new("aws", runner);
        let err = session
            .json::<serde_json::Value>(&["s3api", "get-bucket-encryption", "--bucket", "b"])
            .expect_err("should fail");
        assert!(error_mentions(
            &err,
            "ServerSideEncryptionConfigurationNotFoundError"
        ));
        assert!(!error_mentions(&err, "AccessDenied"));
        assert!(err.to_string().contains("s3api get-bucket-encryption"));
    }

    #[test]
    fn empty_output_decodes_as_null() {
        let runner = Arc::new(ScriptedRunner::new().ok("aws s3api get-bucket-versioning", ""));
        let session = CliSession::new("aws", runner);
        let value: Option<serde_json::Value> = session
            .json(&["s3api", "get-bucket-versioning", "--bucket", "b"])
            .expect("decode");
        assert!(value.is_none());
    }
}
