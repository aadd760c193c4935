//! Downstream MCP client abstraction.
//!
//! [`BackendClient`] is the contract the engine routes through;
//! [`RmcpClient`] implements it over an rmcp client session, and
//! [`IsolatorFactory`] is the production [`ClientFactory`], launching
//! backends according to the isolator's plan. Tests inject mock factories
//! with canned list pages.

use std::sync::Arc;

use async_trait::async_trait;
use posuer_config::ServerConfig;
use posuer_isolate::Launch;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ClientInfo, GetPromptRequestParam, GetPromptResult,
    Implementation, InitializeResult, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, ListToolsResult, PaginatedRequestParam, ReadResourceRequestParam,
    ReadResourceResult,
};
use rmcp::service::{Peer, RoleClient, RunningService, ServiceError};
use rmcp::transport::{SseClientTransport, TokioChildProcess};
use rmcp::{ClientHandler, ServiceExt};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// A live connection to one backend MCP server.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// The `Initialize` result captured when the session was established,
    /// or `None` if the handshake produced nothing.
    fn initialize_result(&self) -> Option<InitializeResult>;

    /// Re-read the backend's declared capabilities.
    ///
    /// MCP sessions accept a single `Initialize`, so implementations
    /// return the cached handshake result rather than re-handshaking.
    async fn reinitialize(&self) -> Result<InitializeResult>;

    /// One page of the paginated `tools/list`.
    async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult>;

    async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult>;

    async fn list_resources(&self, cursor: Option<String>) -> Result<ListResourcesResult>;

    async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> Result<ListResourceTemplatesResult>;

    async fn call_tool(&self, params: CallToolRequestParam) -> Result<CallToolResult>;

    async fn get_prompt(&self, params: GetPromptRequestParam) -> Result<GetPromptResult>;

    async fn read_resource(&self, params: ReadResourceRequestParam) -> Result<ReadResourceResult>;

    /// Close the connection. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Creates backend clients from server configs.
///
/// This is the seam for deterministic testing: production uses
/// [`IsolatorFactory`], tests pass mocks.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, config: &ServerConfig) -> Result<Arc<dyn BackendClient>>;
}

/// Client-side handler advertising the interposer's own identity to
/// backends during the `Initialize` handshake.
#[derive(Clone)]
pub struct InterposerClient {
    info: ClientInfo,
}

impl InterposerClient {
    pub fn new(info: ClientInfo) -> Self {
        Self { info }
    }
}

impl ClientHandler for InterposerClient {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }
}

/// Build the identity presented to backends.
pub fn client_identity(name: &str, version: &str) -> ClientInfo {
    let mut implementation = Implementation::from_build_env();
    implementation.name = name.to_string();
    implementation.version = version.to_string();

    ClientInfo {
        client_info: implementation,
        ..ClientInfo::default()
    }
}

/// [`BackendClient`] over a running rmcp client session.
pub struct RmcpClient {
    peer: Peer<RoleClient>,
    initialize_result: Option<InitializeResult>,
    service: Mutex<Option<RunningService<RoleClient, InterposerClient>>>,
}

impl RmcpClient {
    /// Spawn a child process backend and complete the MCP handshake.
    pub async fn connect_stdio(name: &str, command: Command, identity: ClientInfo) -> Result<Self> {
        let transport = TokioChildProcess::new(command).map_err(|e| {
            Error::InitializationFailed {
                name: name.to_string(),
                reason: format!("failed to spawn: {e}"),
            }
        })?;

        let service = InterposerClient::new(identity)
            .serve(transport)
            .await
            .map_err(|e| Error::InitializationFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self::from_service(service))
    }

    /// Connect to an SSE backend and complete the MCP handshake.
    pub async fn connect_sse(name: &str, url: &str, identity: ClientInfo) -> Result<Self> {
        let transport = SseClientTransport::start(url.to_string()).await.map_err(|e| {
            Error::InitializationFailed {
                name: name.to_string(),
                reason: format!("failed to connect to {url}: {e}"),
            }
        })?;

        let service = InterposerClient::new(identity)
            .serve(transport)
            .await
            .map_err(|e| Error::InitializationFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self::from_service(service))
    }

    fn from_service(service: RunningService<RoleClient, InterposerClient>) -> Self {
        let peer = service.peer().clone();
        let initialize_result = service.peer_info().cloned();

        Self {
            peer,
            initialize_result,
            service: Mutex::new(Some(service)),
        }
    }

    fn paginated(cursor: Option<String>) -> Option<PaginatedRequestParam> {
        cursor.map(|cursor| PaginatedRequestParam {
            cursor: Some(cursor),
            ..PaginatedRequestParam::default()
        })
    }
}

fn rpc_error(error: ServiceError) -> Error {
    Error::Rpc(error.to_string())
}

#[async_trait]
impl BackendClient for RmcpClient {
    fn initialize_result(&self) -> Option<InitializeResult> {
        self.initialize_result.clone()
    }

    async fn reinitialize(&self) -> Result<InitializeResult> {
        self.initialize_result.clone().ok_or_else(|| Error::Rpc(
            "no initialize result cached for session".to_string(),
        ))
    }

    async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult> {
        self.peer
            .list_tools(Self::paginated(cursor))
            .await
            .map_err(rpc_error)
    }

    async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult> {
        self.peer
            .list_prompts(Self::paginated(cursor))
            .await
            .map_err(rpc_error)
    }

    async fn list_resources(&self, cursor: Option<String>) -> Result<ListResourcesResult> {
        self.peer
            .list_resources(Self::paginated(cursor))
            .await
            .map_err(rpc_error)
    }

    async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> Result<ListResourceTemplatesResult> {
        self.peer
            .list_resource_templates(Self::paginated(cursor))
            .await
            .map_err(rpc_error)
    }

    async fn call_tool(&self, params: CallToolRequestParam) -> Result<CallToolResult> {
        self.peer.call_tool(params).await.map_err(rpc_error)
    }

    async fn get_prompt(&self, params: GetPromptRequestParam) -> Result<GetPromptResult> {
        self.peer.get_prompt(params).await.map_err(rpc_error)
    }

    async fn read_resource(&self, params: ReadResourceRequestParam) -> Result<ReadResourceResult> {
        self.peer.read_resource(params).await.map_err(rpc_error)
    }

    async fn close(&self) -> Result<()> {
        let service = self.service.lock().await.take();

        if let Some(service) = service {
            service
                .cancel()
                .await
                .map_err(|e| Error::Rpc(format!("failed to close client: {e}")))?;
        }

        Ok(())
    }
}

/// Production factory: launch per the isolator's plan, then connect.
pub struct IsolatorFactory {
    identity: ClientInfo,
}

impl IsolatorFactory {
    pub fn new(identity: ClientInfo) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl ClientFactory for IsolatorFactory {
    async fn connect(&self, config: &ServerConfig) -> Result<Arc<dyn BackendClient>> {
        match posuer_isolate::launch_plan(config)? {
            Launch::Stdio { command, args, env } => {
                tracing::debug!(
                    backend = %config.name,
                    command = %command,
                    ?args,
                    "spawning stdio backend"
                );

                let mut process = Command::new(&command);
                process.args(&args);
                for (key, value) in &env {
                    process.env(key, value);
                }

                let client =
                    RmcpClient::connect_stdio(&config.name, process, self.identity.clone()).await?;
                Ok(Arc::new(client))
            }
            Launch::Sse { url } => {
                tracing::debug!(backend = %config.name, url = %url, "connecting to sse backend");

                let client =
                    RmcpClient::connect_sse(&config.name, &url, self.identity.clone()).await?;
                Ok(Arc::new(client))
            }
        }
    }
}
