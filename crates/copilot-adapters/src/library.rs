//! Adapter for the media library server (MediaLibrary tool surface).

use async_trait::async_trait;
use copilot_core::{ErrorKind, GatewayError, GatewayResult, UpstreamConfig, UpstreamKind};
use serde_json::Value;
use std::time::Instant;

use crate::adapter::{ToolDescriptor, UpstreamAdapter};
use crate::http::HttpTransport;

const TOOLS: &[ToolDescriptor] = &[
    ToolDescriptor::always("getLibraries"),
    ToolDescriptor::always("getLibraryItems"),
    ToolDescriptor::always("getRecentlyAdded"),
    ToolDescriptor::always("getOnDeck"),
    ToolDescriptor::always("refreshLibrary"),
    ToolDescriptor::always("search"),
    ToolDescriptor::always("getSessions"),
    ToolDescriptor::always("getHistory"),
    ToolDescriptor::always("getStatus"),
];

pub struct MediaLibraryAdapter {
    transport: HttpTransport,
}

impl MediaLibraryAdapter {
    pub fn new(config: &UpstreamConfig) -> Self {
        assert_eq!(config.kind, UpstreamKind::MediaLibrary);
        Self { transport: HttpTransport::new(config) }
    }

    fn require_library_id(params: &Value) -> GatewayResult<&str> {
        params
            .get("libraryId")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::new(ErrorKind::Validation, "missing required 'libraryId' parameter"))
    }
}

#[async_trait]
impl UpstreamAdapter for MediaLibraryAdapter {
    fn kind(&self) -> UpstreamKind {
        UpstreamKind::MediaLibrary
    }

    async fn connect(&self) -> GatewayResult<()> {
        if self.transport.is_connected() {
            return Ok(());
        }
        let deadline = Instant::now() + std::time::Duration::from_secs(30);
        self.transport.get_json("status", deadline).await?;
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
        Ok(TOOLS.iter().map(|t| t.name.to_string()).collect())
    }

    async fn call_tool(&self, tool_name: &str, params: Value, deadline: Instant) -> GatewayResult<Value> {
        if !TOOLS.iter().any(|t| t.name == tool_name) {
            return Err(GatewayError::new(ErrorKind::Validation, format!("unknown tool '{tool_name}'")));
        }

        match tool_name {
            "getLibraries" => self.transport.get_json("libraries", deadline).await,
            "getLibraryItems" => {
                let library_id = Self::require_library_id(&params)?;
                self.transport.get_json(&format!("libraries/{library_id}/items"), deadline).await
            }
            "getRecentlyAdded" => self.transport.get_json("recently_added", deadline).await,
            "getOnDeck" => self.transport.get_json("on_deck", deadline).await,
            "refreshLibrary" => {
                let library_id = Self::require_library_id(&params)?;
                self.transport
                    .mutate_json(reqwest::Method::POST, &format!("libraries/{library_id}/refresh"), None, deadline)
                    .await
            }
            "search" => {
                let query = params
                    .get("query")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(ErrorKind::Validation, "missing 'query'"))?;
                self.transport.get_json(&format!("search?query={query}"), deadline).await
            }
            "getSessions" => self.transport.get_json("sessions", deadline).await,
            "getHistory" => self.transport.get_json("history", deadline).await,
            "getStatus" => self.transport.get_json("status", deadline).await,
            other => Err(GatewayError::new(ErrorKind::Validation, format!("unhandled tool '{other}'"))),
        }
    }
}
