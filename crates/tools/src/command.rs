//! Command tool: run a configured program for a tool call.
//!
//! The JSON arguments are written to the child's stdin and `OI_TOOL_NAME`
//! is set in its environment. A zero exit status makes stdout the result;
//! anything else is a failed call carrying stderr.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use oi_config::ToolConfig;
use oi_core::error::ToolError;
use oi_core::tool::Tool;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct CommandTool {
    name: String,
    description: String,
    parameters: serde_json::Value,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTool {
    pub fn from_config(name: &str, config: &ToolConfig) -> Self {
        let description = if config.description.is_empty() {
            format!("Run `{}`", config.command)
        } else {
            config.description.clone()
        };
        Self {
            name: name.to_string(),
            description,
            parameters: config.parameters.clone(),
            program: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn failed(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: reason.into(),
        }
    }

    async fn run(&self, input: Vec<u8>) -> Result<String, ToolError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("OI_TOOL_NAME", &self.name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.failed(format!("failed to start {}: {e}", self.program)))?;

        // Output is drained while the input is written, so a child that
        // writes before it reads cannot fill its pipe and stall.
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return;
            };
            // A child that never reads its input closes the pipe early.
            if let Err(e) = stdin.write_all(&input).await {
                debug!(tool = %self.name, error = %e, "Tool did not read its input");
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| self.failed(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(tool = %self.name, exit_code = code, "Tool command failed");
        let detail = if stderr.is_empty() { stdout } else { stderr };
        Err(self.failed(format!("[exit code: {code}] {detail}").trim_end().to_string()))
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let input = serde_json::to_vec(&arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        debug!(tool = %self.name, program = %self.program, "Executing tool command");

        match tokio::time::timeout(self.timeout, self.run(input)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool_name: self.name.clone(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}
