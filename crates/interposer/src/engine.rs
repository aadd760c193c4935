//! The interposer engine.
//!
//! Owns the upstream facade, the live backend sessions, and the capability
//! registry; orchestrates adds, removes, capability-only updates, and the
//! reconfiguration diff, emitting change notifications upstream.
//!
//! Lock discipline: the sessions lock `M` is acquired before the registry
//! lock when both are needed, and neither is held across an RPC or a
//! notification send. Handles are cloned out under the lock, the guard is
//! dropped, and only then does the engine await.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use posuer_config::{CapabilityType, ServerConfig};

use crate::client::{client_identity, ClientFactory, IsolatorFactory};
use crate::error::{Error, Result};
use crate::facade::{ChangeKind, ServerSurface, UpstreamFacade};
use crate::registry::CapabilityRegistry;
use crate::rewrite;
use crate::server::InterposerServer;
use crate::session::BackendSession;

/// Which capability kinds a mutation touched, aggregated across a whole
/// reconfiguration for the final notification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeFlags {
    pub tools: bool,
    pub prompts: bool,
    pub resources: bool,
    pub templates: bool,
}

impl ChangeFlags {
    pub fn merge(&mut self, other: ChangeFlags) {
        self.tools |= other.tools;
        self.prompts |= other.prompts;
        self.resources |= other.resources;
        self.templates |= other.templates;
    }

    pub fn set(&mut self, kind: CapabilityType) {
        match kind {
            CapabilityType::Tool => self.tools = true,
            CapabilityType::Prompt => self.prompts = true,
            CapabilityType::Resource => self.resources = true,
            CapabilityType::Template => self.templates = true,
        }
    }

    pub fn any(&self) -> bool {
        self.tools || self.prompts || self.resources || self.templates
    }

    fn from_kinds(caps: &HashMap<CapabilityType, Vec<String>>) -> Self {
        let mut flags = ChangeFlags::default();
        for (kind, names) in caps {
            if !names.is_empty() {
                flags.set(*kind);
            }
        }
        flags
    }
}

/// The MCP aggregating interposer.
///
/// Construct one in `main` and share it behind an `Arc`; it is not a
/// global.
pub struct Interposer {
    name: String,
    version: String,
    surface: Arc<ServerSurface>,
    facade: Arc<dyn UpstreamFacade>,
    sessions: RwLock<HashMap<String, Arc<BackendSession>>>,
    registry: Arc<CapabilityRegistry>,
    factory: Arc<dyn ClientFactory>,
}

impl Interposer {
    pub fn new(name: &str, version: &str) -> Self {
        let surface = Arc::new(ServerSurface::new());

        Self {
            name: name.to_string(),
            version: version.to_string(),
            surface: Arc::clone(&surface),
            facade: surface,
            sessions: RwLock::new(HashMap::new()),
            registry: Arc::new(CapabilityRegistry::new()),
            factory: Arc::new(IsolatorFactory::new(client_identity(name, version))),
        }
    }

    /// Replace the client factory (tests, alternative isolators).
    pub fn with_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Replace the upstream facade (tests).
    pub fn with_facade(mut self, facade: Arc<dyn UpstreamFacade>) -> Self {
        self.facade = facade;
        self
    }

    /// The surface the rmcp server handler serves from.
    pub fn surface(&self) -> Arc<ServerSurface> {
        Arc::clone(&self.surface)
    }

    /// The rmcp server handler presenting the merged namespace upstream.
    pub fn server(&self) -> InterposerServer {
        InterposerServer::new(&self.name, &self.version, Arc::clone(&self.surface))
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Names of the currently live backends.
    pub fn backends(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Connect a backend and merge its capabilities upstream.
    ///
    /// Creation failure leaves no partial state behind.
    pub async fn add_backend(&self, name: &str, config: &ServerConfig) -> Result<()> {
        rewrite::validate_backend_name(name)?;

        let client = self.factory.connect(config).await?;

        let Some(init) = client.initialize_result() else {
            return Err(Error::InitializationFailed {
                name: name.to_string(),
                reason: "initialize returned no result".to_string(),
            });
        };

        let session = Arc::new(BackendSession::new(
            name,
            config.clone(),
            client,
            Arc::clone(&self.facade),
            Arc::clone(&self.registry),
        ));

        session.register_capabilities(&init).await;

        self.sessions.write().insert(name.to_string(), session);

        Ok(())
    }

    /// Remove a backend: drop the session, close its client, and delete
    /// its items from the registry and the facade.
    ///
    /// Returns which kinds the backend owned, for notification purposes.
    async fn remove_backend(&self, name: &str) -> ChangeFlags {
        let session = self.sessions.write().remove(name);

        let Some(session) = session else {
            return ChangeFlags::default();
        };

        let flags = ChangeFlags::from_kinds(&self.registry.for_backend(name));

        session.close().await;

        let removed = self.registry.remove_backend(name);
        if let Some(tools) = removed.get(&CapabilityType::Tool) {
            self.facade.delete_tools(tools);
        }
        if let Some(prompts) = removed.get(&CapabilityType::Prompt) {
            self.facade.delete_prompts(prompts);
        }
        if let Some(resources) = removed.get(&CapabilityType::Resource) {
            self.facade.delete_resources(resources);
        }
        if let Some(templates) = removed.get(&CapabilityType::Template) {
            self.facade.delete_resource_templates(templates);
        }

        flags
    }

    /// Apply a policy-only config change to a live backend without
    /// dropping its connection.
    ///
    /// Items now disallowed are pruned; the supported capability types are
    /// re-enumerated and items now allowed are registered. Returns which
    /// kinds changed so the caller can notify; an RPC failure is returned
    /// so the caller may fall back to a full restart.
    pub async fn update_capability_config(
        &self,
        name: &str,
        new_config: &ServerConfig,
    ) -> Result<ChangeFlags> {
        let session = self
            .sessions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::BackendNotFound(name.to_string()))?;

        if new_config.disabled() {
            tracing::info!(backend = %name, "backend is now disabled, removing");
            return Ok(self.remove_backend(name).await);
        }

        let mut flags = self.prune_disallowed(name, new_config);

        let init = session.client().reinitialize().await?;

        // What is still registered, by raw name, so re-enumeration only
        // adds the missing items.
        let current = self.registered_raw_names(name);
        let empty = Default::default();

        let updated = Arc::new(BackendSession::new(
            name,
            new_config.clone(),
            Arc::clone(session.client()),
            Arc::clone(&self.facade),
            Arc::clone(&self.registry),
        ));

        if init.capabilities.tools.is_some() {
            let registered = current.get(&CapabilityType::Tool).unwrap_or(&empty);
            match updated.register_tools(Some(registered)).await {
                Ok(changed) => flags.tools |= changed,
                Err(error) => tracing::warn!(backend = %name, %error, "error processing tools"),
            }
        }

        if init.capabilities.prompts.is_some() {
            let registered = current.get(&CapabilityType::Prompt).unwrap_or(&empty);
            match updated.register_prompts(Some(registered)).await {
                Ok(changed) => flags.prompts |= changed,
                Err(error) => tracing::warn!(backend = %name, %error, "error processing prompts"),
            }
        }

        if init.capabilities.resources.is_some() {
            let registered = current.get(&CapabilityType::Resource).unwrap_or(&empty);
            match updated.register_resources(Some(registered)).await {
                Ok(changed) => flags.resources |= changed,
                Err(error) => {
                    tracing::warn!(backend = %name, %error, "error processing resources");
                }
            }

            let registered = current.get(&CapabilityType::Template).unwrap_or(&empty);
            match updated.register_resource_templates(Some(registered)).await {
                Ok(changed) => flags.templates |= changed,
                Err(error) => {
                    tracing::warn!(backend = %name, %error, "error processing resource templates");
                }
            }
        }

        // The session now carries the new policy for future diffs.
        self.sessions.write().insert(name.to_string(), updated);

        Ok(flags)
    }

    /// Apply a new set of server configurations to the live interposer.
    ///
    /// Diffs against the current sessions in three phases (remove, update,
    /// add), then emits aggregated change notifications. Per-backend
    /// failures are logged; the rest of the reconfiguration proceeds.
    pub async fn reconfigure(&self, configs: &[ServerConfig]) -> Result<()> {
        let mut new_map: HashMap<String, &ServerConfig> = HashMap::new();
        for config in configs {
            if config.disabled() {
                tracing::info!(backend = %config.name, "backend disabled by configuration");
                continue;
            }
            new_map.insert(config.name.clone(), config);
        }

        let current: Vec<String> = self.sessions.read().keys().cloned().collect();

        let mut flags = ChangeFlags::default();

        // Remove phase: backends no longer configured.
        for name in &current {
            if !new_map.contains_key(name) {
                tracing::info!(backend = %name, "removing backend no longer in configuration");
                flags.merge(self.remove_backend(name).await);
            }
        }

        // Update phase: backends present on both sides.
        for name in &current {
            let Some(config) = new_map.remove(name) else {
                continue;
            };

            let session = self.sessions.read().get(name).cloned();
            let Some(session) = session else {
                // Session vanished since the snapshot; recreate it.
                flags.merge(self.try_add_backend(name, config).await);
                continue;
            };

            let old_config = session.config();
            if old_config.transport_eq(config) {
                if old_config.policy_eq(config) {
                    tracing::debug!(backend = %name, "backend configuration unchanged");
                    continue;
                }

                tracing::info!(backend = %name, "capability configuration changed, updating");
                match self.update_capability_config(name, config).await {
                    Ok(changed) => {
                        flags.merge(changed);
                        continue;
                    }
                    Err(error) => {
                        tracing::warn!(
                            backend = %name,
                            %error,
                            "capability update failed, falling back to restart"
                        );
                    }
                }
            }

            flags.merge(self.restart_backend(name, config).await);
        }

        // Add phase: newly configured backends.
        for (name, config) in new_map {
            tracing::info!(backend = %name, "adding new backend");
            flags.merge(self.try_add_backend(&name, config).await);
        }

        self.send_notifications(flags).await;

        Ok(())
    }

    /// Close every backend client. Errors are logged.
    pub async fn close(&self) {
        let sessions: Vec<_> = {
            let mut guard = self.sessions.write();
            guard.drain().collect()
        };

        for (name, session) in sessions {
            tracing::debug!(backend = %name, "closing backend");
            session.close().await;
        }
    }

    async fn try_add_backend(&self, name: &str, config: &ServerConfig) -> ChangeFlags {
        match self.add_backend(name, config).await {
            Ok(()) => ChangeFlags::from_kinds(&self.registry.for_backend(name)),
            Err(error) => {
                tracing::warn!(backend = %name, %error, "failed to add backend");
                ChangeFlags::default()
            }
        }
    }

    async fn restart_backend(&self, name: &str, config: &ServerConfig) -> ChangeFlags {
        tracing::info!(backend = %name, "restarting backend with updated configuration");

        let mut flags = self.remove_backend(name).await;
        flags.merge(self.try_add_backend(name, config).await);
        flags
    }

    /// Delete currently-registered items the new policy disallows, from
    /// both the facade and the registry.
    fn prune_disallowed(&self, name: &str, new_config: &ServerConfig) -> ChangeFlags {
        let mut flags = ChangeFlags::default();

        for (kind, qualified_names) in self.registry.for_backend(name) {
            let mut to_delete = Vec::new();

            for qualified in qualified_names {
                let Some(raw) = rewrite::raw_name(name, kind, &qualified) else {
                    continue;
                };

                if !new_config.enabled(kind, &raw) {
                    tracing::debug!(
                        backend = %name,
                        %kind,
                        name = %raw,
                        "item is now disabled"
                    );
                    self.registry.remove(kind, &qualified);
                    to_delete.push(qualified);
                }
            }

            if to_delete.is_empty() {
                continue;
            }

            match kind {
                CapabilityType::Tool => self.facade.delete_tools(&to_delete),
                CapabilityType::Prompt => self.facade.delete_prompts(&to_delete),
                CapabilityType::Resource => self.facade.delete_resources(&to_delete),
                CapabilityType::Template => self.facade.delete_resource_templates(&to_delete),
            }

            flags.set(kind);
        }

        flags
    }

    /// Raw names of everything currently registered for a backend.
    fn registered_raw_names(
        &self,
        name: &str,
    ) -> HashMap<CapabilityType, std::collections::HashSet<String>> {
        self.registry
            .for_backend(name)
            .into_iter()
            .map(|(kind, qualified_names)| {
                let raws = qualified_names
                    .iter()
                    .filter_map(|qualified| rewrite::raw_name(name, kind, qualified))
                    .collect();
                (kind, raws)
            })
            .collect()
    }

    /// Emit aggregated notifications, ordered tools, prompts, resources.
    async fn send_notifications(&self, flags: ChangeFlags) {
        if flags.tools {
            self.facade.send_change(ChangeKind::Tools).await;
        }

        if flags.prompts {
            self.facade.send_change(ChangeKind::Prompts).await;
        }

        if flags.resources || flags.templates {
            self.facade.send_change(ChangeKind::Resources).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_flags_merge_and_set() {
        let mut flags = ChangeFlags::default();
        assert!(!flags.any());

        flags.set(CapabilityType::Tool);
        assert!(flags.tools && flags.any());

        let mut other = ChangeFlags::default();
        other.set(CapabilityType::Template);
        flags.merge(other);
        assert!(flags.tools && flags.templates);
        assert!(!flags.prompts && !flags.resources);
    }

    #[test]
    fn change_flags_from_kinds_ignores_empty_lists() {
        let caps = HashMap::from([
            (CapabilityType::Tool, vec!["fs-ls".to_string()]),
            (CapabilityType::Prompt, Vec::new()),
        ]);

        let flags = ChangeFlags::from_kinds(&caps);
        assert!(flags.tools);
        assert!(!flags.prompts);
    }
}
