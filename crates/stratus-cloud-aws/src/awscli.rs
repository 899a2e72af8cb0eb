//! aws CLI wrapper
//!
//! Wraps the `aws` command line for every provider operation. All commands
//! request JSON output. Secret parameters never appear on the command line:
//! they are written to a private `--cli-input-json` file for the duration of
//! the call.

use crate::error::{AwsError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::process::Command;

const REDACTED: &str = "******";
const INPUT_FLAG: &str = "--cli-input-json";

/// Arguments of one aws command, starting with `<service> <operation>`
#[derive(Clone)]
pub struct Args {
    args: Vec<String>,
    /// API parameter name to value, passed via the input file
    secrets: BTreeMap<String, String>,
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("args", &self.args)
            .field("secrets", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Args {
    pub fn new(service: &str, operation: &str) -> Self {
        Self {
            args: vec![service.to_string(), operation.to_string()],
            secrets: BTreeMap::new(),
        }
    }

    /// `<service> <operation>` for error messages
    pub fn command(&self) -> String {
        self.args.iter().take(2).cloned().collect::<Vec<_>>().join(" ")
    }

    pub fn flag(mut self, flag: &str) -> Self {
        self.args.push(flag.to_string());
        self
    }

    pub fn opt(mut self, flag: &str, value: impl Into<String>) -> Self {
        self.args.push(flag.to_string());
        self.args.push(value.into());
        self
    }

    pub fn opt_if(self, flag: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.opt(flag, value),
            None => self,
        }
    }

    /// `--flag` when `on`, `--no-flag` otherwise
    pub fn toggle(self, name: &str, on: bool) -> Self {
        if on {
            self.flag(&format!("--{}", name))
        } else {
            self.flag(&format!("--no-{}", name))
        }
    }

    /// Flag followed by several values (`--subnet-ids a b c`)
    pub fn values<I, S>(mut self, flag: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.push(flag.to_string());
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Flag with a JSON document value
    pub fn json(self, flag: &str, value: &Value) -> Self {
        self.opt(flag, value.to_string())
    }

    /// Secret request parameter, named as in the API (`MasterUserPassword`)
    pub fn secret(mut self, parameter: &str, value: impl Into<String>) -> Self {
        self.secrets.insert(parameter.to_string(), value.into());
        self
    }

    /// Command line with the secret input file redacted
    pub fn display(&self) -> String {
        let mut display = self.args.join(" ");
        if !self.secrets.is_empty() {
            display.push_str(&format!(" {} {}", INPUT_FLAG, REDACTED));
        }
        display
    }

    /// Document holding the secret parameters, if any
    fn secret_input(&self) -> Option<Value> {
        if self.secrets.is_empty() {
            return None;
        }
        Some(Value::Object(
            self.secrets
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        ))
    }

    fn iter(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(String::as_str)
    }
}

/// Write the secret input document to a file only the current user can read
///
/// The file is removed when the returned handle is dropped.
fn write_secret_input(input: &Value) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("stratus-input-")
        .suffix(".json")
        .tempfile()?;
    serde_json::to_writer(&mut file, input)?;
    file.flush()?;
    Ok(file)
}

/// aws CLI wrapper
#[derive(Debug, Clone, Default)]
pub struct AwsCli {
    region: Option<String>,
    profile: Option<String>,
}

impl AwsCli {
    pub fn new(region: Option<String>, profile: Option<String>) -> Self {
        Self { region, profile }
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Check that the aws CLI is installed and credentials resolve
    pub async fn caller_identity(&self) -> Result<CallerIdentity> {
        let which = Command::new("which").arg("aws").output().await?;
        if !which.status.success() {
            return Err(AwsError::CliNotFound);
        }

        let output = self.run(&Args::new("sts", "get-caller-identity")).await?;
        Ok(serde_json::from_value(output)?)
    }

    /// Run an aws command and parse its JSON output
    ///
    /// Commands with no output yield `Value::Null`. The child process is
    /// killed if the returned future is dropped.
    pub async fn run(&self, args: &Args) -> Result<Value> {
        let mut cmd = Command::new("aws");
        if let Some(region) = &self.region {
            cmd.arg("--region").arg(region);
        }
        if let Some(profile) = &self.profile {
            cmd.arg("--profile").arg(profile);
        }
        cmd.args(["--output", "json", "--no-cli-pager"]);
        cmd.args(args.iter());
        let secret_input = args.secret_input().map(|v| write_secret_input(&v)).transpose()?;
        if let Some(file) = &secret_input {
            cmd.arg(INPUT_FLAG)
                .arg(format!("file://{}", file.path().display()));
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!("Running: aws {}", args.display());

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AwsError::CliNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AwsError::from_stderr(&args.command(), &stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&stdout)?)
    }

    /// Like [`Self::run`], with not-found errors mapped to `None`
    pub async fn run_optional(&self, args: &Args) -> Result<Option<Value>> {
        match self.run(args).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Output of `sts get-caller-identity`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
    pub user_id: String,
}

/// String at a JSON pointer, or an unexpected-response error
pub fn str_at<'a>(value: &'a Value, pointer: &str) -> Result<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| AwsError::UnexpectedResponse(format!("missing {}", pointer)))
}

/// First element of an array at a JSON pointer
pub fn first_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a Value> {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .and_then(|items| items.first())
}
