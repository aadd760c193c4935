//! The MCP server presented to the upstream client.
//!
//! Serves the merged namespace out of the shared [`ServerSurface`];
//! invocations dispatch to the forwarding handler registered under the
//! qualified name.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult,
    Implementation, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListToolsResult, LoggingLevel, PaginatedRequestParam, ProtocolVersion,
    ReadResourceRequestParam, ReadResourceResult, ServerCapabilities, ServerInfo,
    SetLevelRequestParam,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData as McpError, ServerHandler};

use crate::facade::ServerSurface;

/// rmcp server handler over the merged capability surface.
#[derive(Clone)]
pub struct InterposerServer {
    name: String,
    version: String,
    surface: Arc<ServerSurface>,
    /// Client-requested logging level.
    log_level: Arc<RwLock<LoggingLevel>>,
}

impl InterposerServer {
    pub fn new(name: &str, version: &str, surface: Arc<ServerSurface>) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            surface,
            log_level: Arc::new(RwLock::new(LoggingLevel::Info)),
        }
    }
}

impl ServerHandler for InterposerServer {
    fn get_info(&self) -> ServerInfo {
        let mut implementation = Implementation::from_build_env();
        implementation.name = self.name.clone();
        implementation.version = self.version.clone();

        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_logging()
                .enable_tools()
                .enable_tool_list_changed()
                .enable_resources()
                .enable_resources_list_changed()
                .enable_prompts()
                .enable_prompts_list_changed()
                .build(),
            server_info: implementation,
            instructions: Some(
                "MCP interposer that aggregates many MCP servers into one session.".to_string(),
            ),
        }
    }

    async fn set_level(
        &self,
        request: SetLevelRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<(), McpError> {
        tracing::debug!(
            request_id = %context.id,
            level = ?request.level,
            "logging/setLevel"
        );
        *self.log_level.write() = request.level;
        Ok(())
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = self.surface.list_tools();

        tracing::debug!(
            request_id = %context.id,
            tool_count = tools.len(),
            "tools/list"
        );

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
            ..Default::default()
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        let tool_name = request.name.to_string();

        let Some(handler) = self.surface.tool_handler(&tool_name) else {
            tracing::debug!(
                request_id = %context.id,
                tool = %tool_name,
                "tools/call: tool not found"
            );
            return Err(McpError::invalid_params(
                format!("Tool not found: {tool_name}"),
                None,
            ));
        };

        let result = handler(request, context.ct.clone()).await;

        match &result {
            Ok(_) => tracing::debug!(
                request_id = %context.id,
                tool = %tool_name,
                elapsed = ?start.elapsed(),
                "tools/call ok"
            ),
            Err(error) => tracing::warn!(
                request_id = %context.id,
                tool = %tool_name,
                %error,
                elapsed = ?start.elapsed(),
                "tools/call failed"
            ),
        }

        result
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        let prompts = self.surface.list_prompts();

        tracing::debug!(
            request_id = %context.id,
            prompt_count = prompts.len(),
            "prompts/list"
        );

        Ok(ListPromptsResult {
            prompts,
            next_cursor: None,
            ..Default::default()
        })
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        let start = Instant::now();
        let prompt_name = request.name.clone();

        let Some(handler) = self.surface.prompt_handler(&prompt_name) else {
            tracing::debug!(
                request_id = %context.id,
                prompt = %prompt_name,
                "prompts/get: prompt not found"
            );
            return Err(McpError::invalid_params(
                format!("Prompt not found: {prompt_name}"),
                None,
            ));
        };

        let result = handler(request, context.ct.clone()).await;

        match &result {
            Ok(_) => tracing::debug!(
                request_id = %context.id,
                prompt = %prompt_name,
                elapsed = ?start.elapsed(),
                "prompts/get ok"
            ),
            Err(error) => tracing::warn!(
                request_id = %context.id,
                prompt = %prompt_name,
                %error,
                elapsed = ?start.elapsed(),
                "prompts/get failed"
            ),
        }

        result
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let resources = self.surface.list_resources();

        tracing::debug!(
            request_id = %context.id,
            resource_count = resources.len(),
            "resources/list"
        );

        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
            ..Default::default()
        })
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        let resource_templates = self.surface.list_resource_templates();

        tracing::debug!(
            request_id = %context.id,
            template_count = resource_templates.len(),
            "resources/templates/list"
        );

        Ok(ListResourceTemplatesResult {
            resource_templates,
            next_cursor: None,
            ..Default::default()
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let start = Instant::now();
        let uri = request.uri.clone();

        let Some(handler) = self.surface.read_handler(&uri) else {
            tracing::debug!(
                request_id = %context.id,
                uri = %uri,
                "resources/read: resource not found"
            );
            return Err(McpError::invalid_params(
                format!("Resource not found: {uri}"),
                None,
            ));
        };

        let result = handler(request, context.ct.clone()).await;

        match &result {
            Ok(_) => tracing::debug!(
                request_id = %context.id,
                uri = %uri,
                elapsed = ?start.elapsed(),
                "resources/read ok"
            ),
            Err(error) => tracing::warn!(
                request_id = %context.id,
                uri = %uri,
                %error,
                elapsed = ?start.elapsed(),
                "resources/read failed"
            ),
        }

        result
    }
}
