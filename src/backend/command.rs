//! External provider program, one process per materialization.
//!
//! Protocol: the program receives `{"node": .., "kind": .., "params": {..}}`
//! on stdin and prints a JSON object of attributes on stdout. A non-zero exit,
//! a timeout, or unparseable output is a provisioning failure.

use super::ProvisioningBackend;
use crate::core::types::{Attributes, ResolvedParams, ResourceKind};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Serialize)]
struct Request<'a> {
    node: &'a str,
    kind: ResourceKind,
    params: &'a ResolvedParams,
}

#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, input: Vec<u8>) -> Result<std::process::Output, String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", self.program.display(), e))?;

        // Fed while stdout/stderr drain; a provider may write before reading
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let written = stdin.write_all(&input).await;
                drop(stdin);
                written
            })
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        if let Some(writer) = writer {
            if output.is_err() {
                writer.abort();
            } else if let Ok(Err(e)) = writer.await {
                // A provider may exit without reading its request
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(format!("stdin write error: {}", e));
                }
            }
        }

        output
            .map_err(|_| format!("provider timed out after {}s", self.timeout.as_secs()))?
            .map_err(|e| format!("wait error: {}", e))
    }
}

/// Attribute values are strings; other JSON scalars are rendered as text.
fn parse_attributes(stdout: &str) -> Result<Attributes, String> {
    let raw: indexmap::IndexMap<String, serde_json::Value> = serde_json::from_str(stdout.trim())
        .map_err(|e| format!("provider output is not a JSON object: {}", e))?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, value)
        })
        .collect())
}

#[async_trait]
impl ProvisioningBackend for CommandBackend {
    fn name(&self) -> &str {
        "command"
    }

    async fn materialize(
        &self,
        node_id: &str,
        kind: ResourceKind,
        params: &ResolvedParams,
    ) -> Result<Attributes, String> {
        let request = Request {
            node: node_id,
            kind,
            params,
        };
        let input =
            serde_json::to_vec(&request).map_err(|e| format!("JSON serialize error: {}", e))?;

        tracing::debug!(node = node_id, program = %self.program.display(), "invoking provider");
        let output = self.run(input).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "provider exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ));
        }
        parse_attributes(&String::from_utf8_lossy(&output.stdout))
    }
}
