//! Shared adapter for the two media managers (TvManager / MovieManager).
//!
//! Sonarr-shaped and Radarr-shaped upstreams expose the same tool
//! vocabulary differing only in terminology (episodes vs. movies); rather
//! than duplicate the adapter, one generic `ArrAdapter` is parameterized by
//! `UpstreamKind` alone and dispatches the same tool set for both.

use async_trait::async_trait;
use copilot_core::{ErrorKind, GatewayError, GatewayResult, UpstreamConfig, UpstreamKind};
use serde_json::Value;
use std::time::Instant;

use crate::adapter::{ToolDescriptor, UpstreamAdapter};
use crate::http::HttpTransport;

const TOOLS: &[ToolDescriptor] = &[
    ToolDescriptor::always("getItems"),
    ToolDescriptor::always("getItemById"),
    ToolDescriptor::always("search"),
    ToolDescriptor::always("addItem"),
    ToolDescriptor::always("deleteItem"),
    ToolDescriptor::always("searchItem"),
    ToolDescriptor::always("refreshItem"),
    ToolDescriptor::always("getCalendar"),
    ToolDescriptor::always("getQueue"),
    ToolDescriptor::always("getWantedMissing"),
    ToolDescriptor::always("getQualityProfiles"),
    ToolDescriptor::always("getRootFolders"),
    ToolDescriptor::always("getIndexers"),
    ToolDescriptor::always("getDownloadClients"),
    ToolDescriptor::always("getHealth"),
    ToolDescriptor::always("getStatus"),
];

pub struct ArrAdapter {
    kind: UpstreamKind,
    transport: HttpTransport,
}

impl ArrAdapter {
    pub fn new(kind: UpstreamKind, config: &UpstreamConfig) -> Self {
        assert_eq!(config.kind, kind);
        assert!(matches!(kind, UpstreamKind::TvManager | UpstreamKind::MovieManager));
        Self { kind, transport: HttpTransport::new(config) }
    }

    fn require_id(params: &Value) -> GatewayResult<&str> {
        params
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::new(ErrorKind::Validation, "missing required 'id' parameter"))
    }
}

#[async_trait]
impl UpstreamAdapter for ArrAdapter {
    fn kind(&self) -> UpstreamKind {
        self.kind
    }

    async fn connect(&self) -> GatewayResult<()> {
        if self.transport.is_connected() {
            return Ok(());
        }
        let deadline = Instant::now() + std::time::Duration::from_secs(30);
        self.transport.get_json("system/status", deadline).await?;
        self.transport.mark_connected();
        Ok(())
    }

    async fn disconnect(&self) {
        self.transport.mark_disconnected();
    }

    async fn health(&self) -> GatewayResult<bool> {
        let deadline = Instant::now() + std::time::Duration::from_secs(10);
        self.transport.get_json("system/status", deadline).await.map(|_| true)
    }

    async fn list_tools(&self) -> GatewayResult<Vec<String>> {
        Ok(TOOLS.iter().map(|t| t.name.to_string()).collect())
    }

    async fn call_tool(&self, tool_name: &str, params: Value, deadline: Instant) -> GatewayResult<Value> {
        if !TOOLS.iter().any(|t| t.name == tool_name) {
            return Err(GatewayError::new(ErrorKind::Validation, format!("unknown tool '{tool_name}'")));
        }

        match tool_name {
            "getItems" => self.transport.get_json("items", deadline).await,
            "getItemById" => {
                let id = Self::require_id(&params)?;
                self.transport.get_json(&format!("items/{id}"), deadline).await
            }
            "search" => {
                let term = params
                    .get("term")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(ErrorKind::Validation, "missing 'term'"))?;
                self.transport.get_json(&format!("search?term={term}"), deadline).await
            }
            "addItem" => {
                self.transport
                    .mutate_json(reqwest::Method::POST, "items", Some(params), deadline)
                    .await
            }
            "deleteItem" => {
                let id = Self::require_id(&params)?;
                let delete_files = params.get("deleteFiles").and_then(Value::as_bool).unwrap_or(false);
                self.transport
                    .mutate_json(
                        reqwest::Method::DELETE,
                        &format!("items/{id}?delete_files={delete_files}"),
                        None,
                        deadline,
                    )
                    .await
            }
            "searchItem" => {
                let id = Self::require_id(&params)?;
                self.transport
                    .mutate_json(reqwest::Method::POST, &format!("items/{id}/search"), Some(params), deadline)
                    .await
            }
            "refreshItem" => {
                let id = Self::require_id(&params)?;
                self.transport
                    .mutate_json(reqwest::Method::POST, &format!("items/{id}/refresh"), None, deadline)
                    .await
            }
            "getCalendar" => {
                let mut query = Vec::new();
                if let Some(start) = params.get("start").and_then(Value::as_str) {
                    query.push(format!("start={start}"));
                }
                if let Some(end) = params.get("end").and_then(Value::as_str) {
                    query.push(format!("end={end}"));
                }
                let path = if query.is_empty() { "calendar".to_string() } else { format!("calendar?{}", query.join("&")) };
                self.transport.get_json(&path, deadline).await
            }
            "getQueue" => self.transport.get_json("queue", deadline).await,
            "getWantedMissing" => self.transport.get_json("wanted/missing", deadline).await,
            "getQualityProfiles" => self.transport.get_json("qualityprofile", deadline).await,
            "getRootFolders" => self.transport.get_json("rootfolder", deadline).await,
            "getIndexers" => self.transport.get_json("indexer", deadline).await,
            "getDownloadClients" => self.transport.get_json("downloadclient", deadline).await,
            "getHealth" => self.transport.get_json("health", deadline).await,
            "getStatus" => self.transport.get_json("system/status", deadline).await,
            other => Err(GatewayError::new(ErrorKind::Validation, format!("unhandled tool '{other}'"))),
        }
    }
}
