use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AgentRuntime, ControlCommand, Query, QueryControl, RuntimeOutput};
use crate::error::{RelayError, Result};
use crate::queue::MessageProducer;
use crate::session::QueryOptions;
use crate::session::options::CREDENTIAL_ENV_VAR;
use crate::AgentConfig;

const DEFAULT_CLAUDE_ARGS: &[&str] = &[
    "-p",
    "--verbose",
    "--output-format=stream-json",
    "--input-format=stream-json",
    "--permission-prompt-tool=stdio",
];

const OUTPUT_BUFFER_SIZE: usize = 256;
/// 进程退出后等待 stderr 读完的上限，孙进程可能一直持有 stderr。
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// 写端关闭后为 `None`，子进程随之收到 EOF。
type SharedStdin = Arc<Mutex<Option<ChildStdin>>>;
type OutputSender = mpsc::Sender<Result<RuntimeOutput>>;

/// Claude Agent SDK runtime over `claude -p --input/output-format stream-json`.
///
/// stdin is fed from the message producer, stdout lines are forwarded verbatim,
/// stderr lines become diagnostics.
pub struct ClaudeSdkRuntime {
    name: String,
    config: AgentConfig,
}

impl ClaudeSdkRuntime {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            name: format!("claude-sdk:{}", config.command),
            config,
        }
    }

    fn effective_args(&self, options: &QueryOptions) -> Vec<String> {
        let mut args: Vec<String> = if self.config.args.is_empty() {
            DEFAULT_CLAUDE_ARGS
                .iter()
                .map(|arg| (*arg).to_string())
                .collect()
        } else {
            self.config.args.clone()
        };

        args.push(format!("--permission-mode={}", options.permission_mode));
        if options.include_partial_messages {
            args.push("--include-partial-messages".to_string());
        }
        args.extend(option_args(&options.extra));
        args
    }

    async fn send_json(stdin: &SharedStdin, payload: &impl Serialize) -> Result<()> {
        let line = serde_json::to_string(payload)?;
        let mut guard = stdin.lock().await;
        let guard = guard
            .as_mut()
            .ok_or_else(|| RelayError::Runtime("Claude SDK stdin is closed".to_string()))?;
        guard.write_all(line.as_bytes()).await?;
        guard.write_all(b"\n").await?;
        guard.flush().await?;
        Ok(())
    }

    async fn send_control_request(stdin: &SharedStdin, subtype: &str) -> Result<()> {
        Self::send_json(
            stdin,
            &json!({
                "type": "control_request",
                "request_id": Uuid::new_v4().to_string(),
                "request": {
                    "subtype": subtype
                }
            }),
        )
        .await
    }

    async fn send_control_success(
        stdin: &SharedStdin,
        request_id: &str,
        response: Value,
    ) -> Result<()> {
        Self::send_json(
            stdin,
            &json!({
                "type": "control_response",
                "response": {
                    "subtype": "success",
                    "request_id": request_id,
                    "response": response
                }
            }),
        )
        .await
    }

    async fn send_control_error(stdin: &SharedStdin, request_id: &str, error: &str) -> Result<()> {
        Self::send_json(
            stdin,
            &json!({
                "type": "control_response",
                "response": {
                    "subtype": "error",
                    "request_id": request_id,
                    "error": error
                }
            }),
        )
        .await
    }

    async fn handle_control_request(stdin: &SharedStdin, payload: &Value) -> Result<()> {
        let request_id = payload
            .get("request_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let request = payload.get("request").cloned().unwrap_or_else(|| json!({}));
        let subtype = request
            .get("subtype")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match subtype {
            "can_use_tool" => {
                let input = request.get("input").cloned().unwrap_or_else(|| json!({}));
                Self::send_control_success(
                    stdin,
                    request_id,
                    json!({
                        "behavior": "allow",
                        "updatedInput": input
                    }),
                )
                .await
            }
            "hook_callback" => {
                Self::send_control_success(
                    stdin,
                    request_id,
                    json!({
                        "hookSpecificOutput": {
                            "hookEventName": "PreToolUse",
                            "permissionDecision": "allow",
                            "permissionDecisionReason": "Approved by relay"
                        }
                    }),
                )
                .await
            }
            other => {
                Self::send_control_error(
                    stdin,
                    request_id,
                    &format!("unsupported control request subtype: {other}"),
                )
                .await
            }
        }
    }

    async fn write_loop(
        mut prompt: MessageProducer,
        mut control_rx: mpsc::UnboundedReceiver<ControlCommand>,
        stdin: SharedStdin,
    ) {
        if let Err(err) = Self::send_control_request(&stdin, "initialize").await {
            warn!(error = %err, "failed to initialize Claude SDK control protocol");
            return;
        }

        let mut control_open = true;
        loop {
            tokio::select! {
                command = control_rx.recv(), if control_open => match command {
                    Some(ControlCommand::Interrupt) => {
                        info!("sending interrupt to Claude SDK");
                        if let Err(err) = Self::send_control_request(&stdin, "interrupt").await {
                            warn!(error = %err, "failed to send interrupt to Claude SDK");
                            break;
                        }
                    }
                    None => control_open = false,
                },
                message = prompt.next() => match message {
                    Some(message) => {
                        if let Err(err) = Self::send_json(&stdin, &message).await {
                            warn!(error = %err, "failed to write user message to Claude SDK");
                            break;
                        }
                    }
                    None => {
                        debug!("message producer stopped, closing Claude SDK stdin");
                        break;
                    }
                },
            }
        }

        if let Some(mut writer) = stdin.lock().await.take()
            && let Err(err) = writer.shutdown().await
        {
            debug!(error = %err, "failed to flush Claude SDK stdin before closing");
        }
    }

    async fn stderr_loop(stderr: ChildStderr, output: OutputSender) {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            if output.send(Ok(RuntimeOutput::Stderr(line))).await.is_err() {
                break;
            }
        }
    }

    async fn read_loop(
        mut child: Child,
        stdout: ChildStdout,
        stdin: SharedStdin,
        output: OutputSender,
        mut stderr_task: JoinHandle<()>,
    ) {
        let mut reader = BufReader::new(stdout).lines();

        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let payload = match serde_json::from_str::<Value>(trimmed) {
                        Ok(value) => value,
                        Err(_) => {
                            warn!(line = %trimmed, "received non-JSON Claude SDK output");
                            continue;
                        }
                    };

                    let msg_type = payload
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    match msg_type.as_str() {
                        "control_request" => {
                            if let Err(err) = Self::handle_control_request(&stdin, &payload).await
                            {
                                warn!(error = %err, "failed to respond to Claude control request");
                            }
                        }
                        "control_response" | "control_cancel_request" | "keep_alive" => {
                            debug!(message_type = %msg_type, "consumed Claude SDK control message");
                        }
                        _ => {
                            if output
                                .send(Ok(RuntimeOutput::Message(payload)))
                                .await
                                .is_err()
                            {
                                debug!("query output dropped, stopping Claude SDK reader");
                                stderr_task.abort();
                                return;
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let _ = output
                        .send(Err(RelayError::Runtime(format!(
                            "failed to read Claude SDK output: {err}"
                        ))))
                        .await;
                    stderr_task.abort();
                    return;
                }
            }
        }

        let exit = child.wait().await;
        if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut stderr_task)
            .await
            .is_err()
        {
            debug!("Claude SDK stderr still open after exit, abandoning it");
            stderr_task.abort();
        }

        match exit {
            Ok(status) if status.success() => info!("Claude SDK process exited"),
            Ok(status) => {
                let _ = output
                    .send(Err(RelayError::Runtime(format!(
                        "Claude SDK process exited with {status}"
                    ))))
                    .await;
            }
            Err(err) => {
                let _ = output.send(Err(err.into())).await;
            }
        }
    }
}

/// 把透传选项映射为 CLI 参数，不认识的键被忽略。
fn option_args(extra: &Map<String, Value>) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in extra {
        let flag = match key.as_str() {
            "model" => "--model",
            "fallbackModel" => "--fallback-model",
            "systemPrompt" => "--system-prompt",
            "appendSystemPrompt" => "--append-system-prompt",
            "maxTurns" => "--max-turns",
            "allowedTools" => "--allowedTools",
            "disallowedTools" => "--disallowedTools",
            _ => {
                debug!(option = %key, "ignoring unsupported runtime option");
                continue;
            }
        };

        let rendered = match value {
            Value::String(text) => text.clone(),
            Value::Number(number) => number.to_string(),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(","),
            other => {
                debug!(option = %key, value = %other, "ignoring runtime option with unsupported value");
                continue;
            }
        };
        args.push(flag.to_string());
        args.push(rendered);
    }
    args
}

#[async_trait]
impl AgentRuntime for ClaudeSdkRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip_all, fields(runtime = %self.name))]
    async fn query(&self, prompt: MessageProducer, options: QueryOptions) -> Result<Query> {
        tokio::fs::create_dir_all(&options.cwd).await?;

        let args = self.effective_args(&options);
        info!(
            command = %self.config.command,
            args = ?args,
            cwd = %options.cwd.display(),
            credential_override = options.env.contains_key(CREDENTIAL_ENV_VAR),
            "spawning Claude SDK process"
        );

        let mut command = Command::new(&self.config.command);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .current_dir(&options.cwd);

        for env_var in &self.config.env {
            command.env(&env_var.key, &env_var.value);
        }
        for (key, value) in &options.env {
            command.env(key, value);
        }

        let mut child = command.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| {
            RelayError::Runtime("failed to capture Claude SDK stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            RelayError::Runtime("failed to capture Claude SDK stdout".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            RelayError::Runtime("failed to capture Claude SDK stderr".to_string())
        })?;

        let stdin = Arc::new(Mutex::new(Some(stdin)));
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_BUFFER_SIZE);
        let (control, control_rx) = QueryControl::channel();

        tokio::spawn(Self::write_loop(prompt, control_rx, stdin.clone()));
        let stderr_task = tokio::spawn(Self::stderr_loop(stderr, output_tx.clone()));
        tokio::spawn(Self::read_loop(child, stdout, stdin, output_tx, stderr_task));

        Ok(Query {
            output: output_rx,
            control,
        })
    }
}
