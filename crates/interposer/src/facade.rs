//! The upstream server surface.
//!
//! The engine registers merged capabilities here together with forwarding
//! handlers; the rmcp [`ServerHandler`](crate::server::InterposerServer)
//! serves `list`/`call`/`get`/`read` requests from this surface. The trait
//! keeps the MCP library swappable and gives tests a recording seam.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ErrorData as McpError, GetPromptRequestParam,
    GetPromptResult, Prompt, ReadResourceRequestParam, ReadResourceResult, Resource,
    ResourceTemplate, Tool,
};
use rmcp::service::{Peer, RoleServer};
use tokio_util::sync::CancellationToken;

/// Which upstream notification a mutation maps to.
///
/// Resources and templates share one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Tools,
    Prompts,
    Resources,
}

pub type ToolHandler = Arc<
    dyn Fn(CallToolRequestParam, CancellationToken) -> BoxFuture<'static, Result<CallToolResult, McpError>>
        + Send
        + Sync,
>;

pub type PromptHandler = Arc<
    dyn Fn(GetPromptRequestParam, CancellationToken) -> BoxFuture<'static, Result<GetPromptResult, McpError>>
        + Send
        + Sync,
>;

pub type ReadHandler = Arc<
    dyn Fn(ReadResourceRequestParam, CancellationToken) -> BoxFuture<'static, Result<ReadResourceResult, McpError>>
        + Send
        + Sync,
>;

/// The surface the engine registers merged capabilities against.
#[async_trait]
pub trait UpstreamFacade: Send + Sync {
    fn add_tool(&self, tool: Tool, handler: ToolHandler);
    fn delete_tools(&self, names: &[String]);

    fn add_prompt(&self, prompt: Prompt, handler: PromptHandler);
    fn delete_prompts(&self, names: &[String]);

    fn add_resource(&self, resource: Resource, handler: ReadHandler);
    fn delete_resources(&self, names: &[String]);

    fn add_resource_template(&self, template: ResourceTemplate, handler: ReadHandler);
    fn delete_resource_templates(&self, names: &[String]);

    /// Best-effort change notification to the upstream client.
    async fn send_change(&self, kind: ChangeKind);
}

/// Production facade backing the rmcp server handler.
///
/// Static resources are keyed by their qualified URI (reads arrive by URI);
/// everything else is keyed by qualified name.
#[derive(Default)]
pub struct ServerSurface {
    tools: RwLock<HashMap<String, (Tool, ToolHandler)>>,
    prompts: RwLock<HashMap<String, (Prompt, PromptHandler)>>,
    resources: RwLock<HashMap<String, (Resource, ReadHandler)>>,
    templates: RwLock<HashMap<String, (ResourceTemplate, ReadHandler)>>,
    peer: RwLock<Option<Peer<RoleServer>>>,
}

impl ServerSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the upstream peer so change notifications can be sent.
    pub fn attach_peer(&self, peer: Peer<RoleServer>) {
        *self.peer.write() = Some(peer);
    }

    /// Snapshot of all merged tools.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.read().values().map(|(tool, _)| tool.clone()).collect()
    }

    pub fn list_prompts(&self) -> Vec<Prompt> {
        self.prompts
            .read()
            .values()
            .map(|(prompt, _)| prompt.clone())
            .collect()
    }

    pub fn list_resources(&self) -> Vec<Resource> {
        self.resources
            .read()
            .values()
            .map(|(resource, _)| resource.clone())
            .collect()
    }

    pub fn list_resource_templates(&self) -> Vec<ResourceTemplate> {
        self.templates
            .read()
            .values()
            .map(|(template, _)| template.clone())
            .collect()
    }

    pub fn tool_handler(&self, name: &str) -> Option<ToolHandler> {
        self.tools.read().get(name).map(|(_, handler)| handler.clone())
    }

    pub fn prompt_handler(&self, name: &str) -> Option<PromptHandler> {
        self.prompts
            .read()
            .get(name)
            .map(|(_, handler)| handler.clone())
    }

    /// Resolve a read by qualified URI: static resources match exactly,
    /// then templates match when the URI starts with the template's literal
    /// prefix (the text before the first expansion variable).
    pub fn read_handler(&self, uri: &str) -> Option<ReadHandler> {
        if let Some((_, handler)) = self.resources.read().get(uri) {
            return Some(handler.clone());
        }

        let templates = self.templates.read();
        templates.values().find_map(|(template, handler)| {
            let text = template.raw.uri_template.as_str();
            let literal = text.split('{').next().unwrap_or(text);
            (!literal.is_empty() && uri.starts_with(literal)).then(|| handler.clone())
        })
    }
}

#[async_trait]
impl UpstreamFacade for ServerSurface {
    fn add_tool(&self, tool: Tool, handler: ToolHandler) {
        self.tools
            .write()
            .insert(tool.name.to_string(), (tool, handler));
    }

    fn delete_tools(&self, names: &[String]) {
        let mut tools = self.tools.write();
        for name in names {
            tools.remove(name);
        }
    }

    fn add_prompt(&self, prompt: Prompt, handler: PromptHandler) {
        self.prompts
            .write()
            .insert(prompt.name.clone(), (prompt, handler));
    }

    fn delete_prompts(&self, names: &[String]) {
        let mut prompts = self.prompts.write();
        for name in names {
            prompts.remove(name);
        }
    }

    fn add_resource(&self, resource: Resource, handler: ReadHandler) {
        self.resources
            .write()
            .insert(resource.raw.uri.clone(), (resource, handler));
    }

    fn delete_resources(&self, names: &[String]) {
        // Registered under URIs, but the registry tracks names; drop by
        // either to keep bulk deletion simple.
        let mut resources = self.resources.write();
        resources.retain(|uri, (resource, _)| {
            !names.contains(uri) && !names.contains(&resource.raw.name)
        });
    }

    fn add_resource_template(&self, template: ResourceTemplate, handler: ReadHandler) {
        self.templates
            .write()
            .insert(template.raw.name.clone(), (template, handler));
    }

    fn delete_resource_templates(&self, names: &[String]) {
        let mut templates = self.templates.write();
        for name in names {
            templates.remove(name);
        }
    }

    async fn send_change(&self, kind: ChangeKind) {
        let peer = self.peer.read().clone();

        let Some(peer) = peer else {
            tracing::debug!(?kind, "no upstream session attached, skipping notification");
            return;
        };

        let result = match kind {
            ChangeKind::Tools => peer.notify_tool_list_changed().await,
            ChangeKind::Prompts => peer.notify_prompt_list_changed().await,
            ChangeKind::Resources => peer.notify_resource_list_changed().await,
        };

        if let Err(error) = result {
            tracing::warn!(?kind, %error, "failed to send change notification");
        }
    }
}
