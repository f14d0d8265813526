//! Tool service transport.

use async_trait::async_trait;
use sage_shared::{CallToolRequest, CallToolResponse, ListToolsRequest, ListToolsResponse};

use crate::error::TransportError;

/// Wire-level access to the tool service. Implementations report failures
/// as `TransportError`; normalization happens in the invoker.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn list_tools(&self, request: &ListToolsRequest)
        -> Result<ListToolsResponse, TransportError>;

    async fn call_tool(&self, request: &CallToolRequest)
        -> Result<CallToolResponse, TransportError>;
}

/// JSON over HTTP: `POST {base}/mcp/list_tools` and `POST {base}/mcp/call_tool`.
pub struct HttpToolTransport {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpToolTransport {
    /// No client-level timeout; the invoker and the registry bound their calls.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Ok(Self {
            http_client: reqwest::Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, TransportError>
    where
        B: serde::Serialize + Sync,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .http_client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ToolTransport for HttpToolTransport {
    async fn list_tools(
        &self,
        request: &ListToolsRequest,
    ) -> Result<ListToolsResponse, TransportError> {
        self.post("/mcp/list_tools", request).await
    }

    async fn call_tool(
        &self,
        request: &CallToolRequest,
    ) -> Result<CallToolResponse, TransportError> {
        self.post("/mcp/call_tool", request).await
    }
}
