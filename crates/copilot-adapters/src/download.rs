//! Adapter for the Usenet download daemon (Download tool surface).

use async_trait::async_trait;
use copilot_core::{ErrorKind, GatewayError, GatewayResult, UpstreamConfig, UpstreamKind};
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::Instant;

use crate::adapter::{ToolDescriptor, UpstreamAdapter, UpstreamVersion};
use crate::http::HttpTransport;

const TOOLS: &[ToolDescriptor] = &[
    ToolDescriptor::always("getQueue"),
    ToolDescriptor::always("getHistory"),
    ToolDescriptor::always("getStatus"),
    ToolDescriptor::always("pauseQueue"),
    ToolDescriptor::always("resumeQueue"),
    ToolDescriptor::always("pauseDownload"),
    ToolDescriptor::always("resumeDownload"),
    ToolDescriptor::always("retryDownload"),
    ToolDescriptor::always("deleteDownload"),
    ToolDescriptor::always("getConfig"),
    ToolDescriptor::always("setConfig"),
    ToolDescriptor::gated("directUnpackToggle", UpstreamVersion::new(3, 0, 0)),
    ToolDescriptor::gated("propagationDelay", UpstreamVersion::new(3, 0, 0)),
    ToolDescriptor::gated("deobfuscationToggle", UpstreamVersion::new(4, 0, 0)),
];

pub struct DownloadAdapter {
    transport: HttpTransport,
    reported_version: RwLock<UpstreamVersion>,
}

impl DownloadAdapter {
    pub fn new(config: &UpstreamConfig) -> Self {
        assert_eq!(config.kind, UpstreamKind::Download);
        Self {
            transport: HttpTransport::new(config),
            reported_version: RwLock::new(UpstreamVersion::default()),
        }
    }

    fn version(&self) -> UpstreamVersion {
        *self.reported_version.read().expect("lock not poisoned")
    }

    fn require_id(params: &Value) -> GatewayResult<&str> {
        params
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::new(ErrorKind::Validation, "missing required 'id' parameter"))
    }
}

#[async_trait]
impl UpstreamAdapter for DownloadAdapter {
    fn kind(&self) -> UpstreamKind {
        UpstreamKind::Download
    }

    async fn connect(&self) -> GatewayResult<()> {
        if self.transport.is_connected() {
            return Ok(());
        }
        let deadline = Instant::now() + std::time::Duration::from_secs(30);
        let status = self.transport.get_json("status", deadline).await?;
        if let Some(version) = status.get("version").and_then(Value::as_str) {
            *self.reported_version.write().expect("lock not poisoned") = UpstreamVersion::parse(version);
        }
        self.transport.mark_connected();
        Ok(())
    }

    async fn disconnect(&self) {
        self.transport.mark_disconnected();
    }

    async fn health(&self) -> GatewayResult<bool> {
        let deadline = Instant::now() + std::time::Duration::from_secs(10);
        self.transport.get_json("status", deadline).await.map(|_| true)
    }

    async fn list_tools(&self) -> GatewayResult<Vec<String>> {
        let version = self.version();
        Ok(TOOLS
            .iter()
            .filter(|t| t.available_at(version))
            .map(|t| t.name.to_string())
            .collect())
    }

    async fn call_tool(&self, tool_name: &str, params: Value, deadline: Instant) -> GatewayResult<Value> {
        let descriptor = TOOLS
            .iter()
            .find(|t| t.name == tool_name)
            .ok_or_else(|| GatewayError::new(ErrorKind::Validation, format!("unknown tool '{tool_name}'")))?;
        if !descriptor.available_at(self.version()) {
            return Err(GatewayError::new(
                ErrorKind::Validation,
                format!("tool '{tool_name}' requires a newer daemon version"),
            ));
        }

        match tool_name {
            "getQueue" => self.transport.get_json("queue", deadline).await,
            "getHistory" => {
                let mut path = "history".to_string();
                let mut query = Vec::new();
                if params.get("failedOnly").and_then(Value::as_bool) == Some(true) {
                    query.push("failed_only=true".to_string());
                }
                if let Some(category) = params.get("category").and_then(Value::as_str) {
                    query.push(format!("category={category}"));
                }
                if !query.is_empty() {
                    path = format!("{path}?{}", query.join("&"));
                }
                self.transport.get_json(&path, deadline).await
            }
            "getStatus" => self.transport.get_json("status", deadline).await,
            "pauseQueue" => self.transport.mutate_json(reqwest::Method::POST, "queue/pause", None, deadline).await,
            "resumeQueue" => self.transport.mutate_json(reqwest::Method::POST, "queue/resume", None, deadline).await,
            "pauseDownload" => {
                let id = Self::require_id(&params)?;
                self.transport
                    .mutate_json(reqwest::Method::POST, &format!("queue/{id}/pause"), None, deadline)
                    .await
            }
            "resumeDownload" => {
                let id = Self::require_id(&params)?;
                self.transport
                    .mutate_json(reqwest::Method::POST, &format!("queue/{id}/resume"), None, deadline)
                    .await
            }
            "retryDownload" => {
                let id = Self::require_id(&params)?;
                self.transport
                    .mutate_json(reqwest::Method::POST, &format!("history/{id}/retry"), None, deadline)
                    .await
            }
            "deleteDownload" => {
                let id = Self::require_id(&params)?;
                let delete_files = params.get("deleteFiles").and_then(Value::as_bool).unwrap_or(false);
                self.transport
                    .mutate_json(
                        reqwest::Method::DELETE,
                        &format!("queue/{id}?delete_files={delete_files}"),
                        None,
                        deadline,
                    )
                    .await
            }
            "getConfig" => {
                let path = match params.get("section").and_then(Value::as_str) {
                    Some(section) => format!("config/{section}"),
                    None => "config".to_string(),
                };
                self.transport.get_json(&path, deadline).await
            }
            "setConfig" => {
                let section = params
                    .get("section")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(ErrorKind::Validation, "missing 'section'"))?;
                let key = params
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(ErrorKind::Validation, "missing 'key'"))?;
                let value = params.get("value").cloned().unwrap_or(Value::Null);
                self.transport
                    .mutate_json(
                        reqwest::Method::PUT,
                        &format!("config/{section}"),
                        Some(json!({ key: value })),
                        deadline,
                    )
                    .await
            }
            "directUnpackToggle" | "propagationDelay" | "deobfuscationToggle" => {
                self.transport
                    .mutate_json(reqwest::Method::PUT, &format!("config/{tool_name}"), Some(params), deadline)
                    .await
            }
            other => Err(GatewayError::new(ErrorKind::Validation, format!("unhandled tool '{other}'"))),
        }
    }
}
