//! A live session with one backend.
//!
//! Enumerates the backend's capabilities with pagination, applies the
//! server's enable/disable policy, rewrites names into the merged
//! namespace, and registers forwarding handlers with the upstream facade.
//! Handlers capture the raw (pre-rewrite) name or URI so outbound requests
//! carry the identifiers the backend expects.

use std::collections::HashSet;
use std::sync::Arc;

use posuer_config::{CapabilityType, ServerConfig};
use rmcp::model::{ErrorData as McpError, InitializeResult};

use crate::client::BackendClient;
use crate::error::{Error, Result};
use crate::facade::{PromptHandler, ReadHandler, ToolHandler, UpstreamFacade};
use crate::registry::CapabilityRegistry;
use crate::rewrite;

pub struct BackendSession {
    name: String,
    config: ServerConfig,
    client: Arc<dyn BackendClient>,
    facade: Arc<dyn UpstreamFacade>,
    registry: Arc<CapabilityRegistry>,
}

impl BackendSession {
    pub fn new(
        name: &str,
        config: ServerConfig,
        client: Arc<dyn BackendClient>,
        facade: Arc<dyn UpstreamFacade>,
        registry: Arc<CapabilityRegistry>,
    ) -> Self {
        Self {
            name: name.to_string(),
            config,
            client,
            facade,
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<dyn BackendClient> {
        &self.client
    }

    /// Enumerate and register everything the backend supports and the
    /// policy allows.
    ///
    /// A failing capability type is skipped with a warning; the other
    /// types still register.
    pub async fn register_capabilities(&self, init: &InitializeResult) {
        if self.config.disabled() {
            tracing::info!(backend = %self.name, "backend is disabled by configuration");
            return;
        }

        if init.capabilities.tools.is_some() {
            if let Err(error) = self.register_tools(None).await {
                tracing::warn!(backend = %self.name, %error, "failed to register tools");
            }
        }

        if init.capabilities.prompts.is_some() {
            if let Err(error) = self.register_prompts(None).await {
                tracing::warn!(backend = %self.name, %error, "failed to register prompts");
            }
        }

        if init.capabilities.resources.is_some() {
            if let Err(error) = self.register_resources(None).await {
                tracing::warn!(backend = %self.name, %error, "failed to register resources");
            }

            if let Err(error) = self.register_resource_templates(None).await {
                tracing::warn!(
                    backend = %self.name,
                    %error,
                    "failed to register resource templates"
                );
            }
        }
    }

    /// Register tools passing the policy filter, skipping raw names in
    /// `already_registered`. Returns whether anything was added.
    pub async fn register_tools(
        &self,
        already_registered: Option<&HashSet<String>>,
    ) -> Result<bool> {
        let mut changed = false;
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .client
                .list_tools(cursor)
                .await
                .map_err(|e| self.enumeration_failed(CapabilityType::Tool, e))?;

            for mut tool in page.tools {
                let raw = tool.name.to_string();

                if !self.allows(CapabilityType::Tool, &raw) {
                    continue;
                }
                if already_registered.is_some_and(|set| set.contains(&raw)) {
                    continue;
                }

                let qualified = rewrite::tool_name(&self.name, &raw);
                tool.name = qualified.clone().into();

                self.facade
                    .add_tool(tool, forward_tool(Arc::clone(&self.client), raw));
                self.registry.add(&self.name, CapabilityType::Tool, qualified);
                changed = true;
            }

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(changed)
    }

    pub async fn register_prompts(
        &self,
        already_registered: Option<&HashSet<String>>,
    ) -> Result<bool> {
        let mut changed = false;
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .client
                .list_prompts(cursor)
                .await
                .map_err(|e| self.enumeration_failed(CapabilityType::Prompt, e))?;

            for mut prompt in page.prompts {
                let raw = prompt.name.clone();

                if !self.allows(CapabilityType::Prompt, &raw) {
                    continue;
                }
                if already_registered.is_some_and(|set| set.contains(&raw)) {
                    continue;
                }

                let qualified = rewrite::prompt_name(&self.name, &raw);
                prompt.name = qualified.clone();

                self.facade
                    .add_prompt(prompt, forward_prompt(Arc::clone(&self.client), raw));
                self.registry
                    .add(&self.name, CapabilityType::Prompt, qualified);
                changed = true;
            }

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(changed)
    }

    pub async fn register_resources(
        &self,
        already_registered: Option<&HashSet<String>>,
    ) -> Result<bool> {
        let mut changed = false;
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .client
                .list_resources(cursor)
                .await
                .map_err(|e| self.enumeration_failed(CapabilityType::Resource, e))?;

            for mut resource in page.resources {
                let raw = resource.raw.name.clone();

                if !self.allows(CapabilityType::Resource, &raw) {
                    continue;
                }
                if already_registered.is_some_and(|set| set.contains(&raw)) {
                    continue;
                }

                let raw_uri = resource.raw.uri.clone();
                let qualified = rewrite::resource_name(&self.name, &raw);
                resource.raw.name = qualified.clone();
                resource.raw.uri = rewrite::resource_uri(&self.name, &raw_uri);

                // The full raw URI rides in the handler, so inbound static
                // reads need no un-rewriting.
                self.facade.add_resource(
                    resource,
                    forward_resource(Arc::clone(&self.client), raw_uri),
                );
                self.registry
                    .add(&self.name, CapabilityType::Resource, qualified);
                changed = true;
            }

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(changed)
    }

    pub async fn register_resource_templates(
        &self,
        already_registered: Option<&HashSet<String>>,
    ) -> Result<bool> {
        let mut changed = false;
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .client
                .list_resource_templates(cursor)
                .await
                .map_err(|e| self.enumeration_failed(CapabilityType::Template, e))?;

            for mut template in page.resource_templates {
                let raw = template.raw.name.clone();

                if !self.allows(CapabilityType::Template, &raw) {
                    continue;
                }
                if already_registered.is_some_and(|set| set.contains(&raw)) {
                    continue;
                }

                let qualified = rewrite::resource_name(&self.name, &raw);
                template.raw.name = qualified.clone();
                template.raw.uri_template =
                    rewrite::resource_uri(&self.name, &template.raw.uri_template);

                // Template expansions arrive with the backend prefix; the
                // handler strips it before forwarding.
                self.facade.add_resource_template(
                    template,
                    forward_template(Arc::clone(&self.client), self.name.clone()),
                );
                self.registry
                    .add(&self.name, CapabilityType::Template, qualified);
                changed = true;
            }

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(changed)
    }

    /// Close the client; errors are logged, not propagated.
    pub async fn close(&self) {
        if let Err(error) = self.client.close().await {
            tracing::warn!(backend = %self.name, %error, "error closing backend client");
        }
    }

    fn allows(&self, kind: CapabilityType, raw: &str) -> bool {
        if self.config.enabled(kind, raw) {
            return true;
        }

        tracing::debug!(
            backend = %self.name,
            %kind,
            name = %raw,
            "item disabled by configuration"
        );
        false
    }

    fn enumeration_failed(&self, kind: CapabilityType, error: Error) -> Error {
        Error::EnumerationFailed {
            backend: self.name.clone(),
            kind,
            reason: error.to_string(),
        }
    }
}

fn cancelled() -> McpError {
    McpError::internal_error("request cancelled", None)
}

fn forwarding_error(error: Error) -> McpError {
    McpError::internal_error(error.to_string(), None)
}

/// Forward a tool call, substituting the backend's raw tool name.
fn forward_tool(client: Arc<dyn BackendClient>, raw_name: String) -> ToolHandler {
    Arc::new(move |mut request, ct| {
        let client = Arc::clone(&client);
        let raw_name = raw_name.clone();

        Box::pin(async move {
            request.name = raw_name.into();

            tokio::select! {
                result = client.call_tool(request) => result.map_err(forwarding_error),
                () = ct.cancelled() => Err(cancelled()),
            }
        })
    })
}

fn forward_prompt(client: Arc<dyn BackendClient>, raw_name: String) -> PromptHandler {
    Arc::new(move |mut request, ct| {
        let client = Arc::clone(&client);
        let raw_name = raw_name.clone();

        Box::pin(async move {
            request.name = raw_name;

            tokio::select! {
                result = client.get_prompt(request) => result.map_err(forwarding_error),
                () = ct.cancelled() => Err(cancelled()),
            }
        })
    })
}

/// Forward a static resource read using the stored raw URI.
fn forward_resource(client: Arc<dyn BackendClient>, raw_uri: String) -> ReadHandler {
    Arc::new(move |mut request, ct| {
        let client = Arc::clone(&client);
        let raw_uri = raw_uri.clone();

        Box::pin(async move {
            request.uri = raw_uri;

            tokio::select! {
                result = client.read_resource(request) => result.map_err(forwarding_error),
                () = ct.cancelled() => Err(cancelled()),
            }
        })
    })
}

/// Forward a template read, stripping the backend's URI prefix.
fn forward_template(client: Arc<dyn BackendClient>, backend: String) -> ReadHandler {
    Arc::new(move |mut request, ct| {
        let client = Arc::clone(&client);
        let backend = backend.clone();

        Box::pin(async move {
            request.uri = rewrite::strip_uri_prefix(&backend, &request.uri).to_string();

            tokio::select! {
                result = client.read_resource(request) => result.map_err(forwarding_error),
                () = ct.cancelled() => Err(cancelled()),
            }
        })
    })
}
