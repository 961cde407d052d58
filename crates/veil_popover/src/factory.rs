//! Overlay factory
//!
//! Builds configuration from declarative options, constructs one
//! [`OverlayController`] per trigger element, and shares a single
//! broadcast registry across every overlay it creates, so global
//! listener count is bounded by distinct event types rather than by the
//! number of overlays.

use std::sync::Arc;

use veil_core::{broadcast_registry, BroadcastRegistry, HostElement, HostServices, Result};

use crate::config::{DeclaredOptions, OverlayKind};
use crate::controller::OverlayController;
use crate::interpolate::TriggerContext;

/// Creates overlay controllers against one host
pub struct OverlayFactory {
    host: HostServices,
    registry: BroadcastRegistry,
}

impl OverlayFactory {
    /// Create a factory with its own broadcast registry
    pub fn new(host: HostServices) -> Self {
        let registry = broadcast_registry(Arc::clone(&host.window));
        Self { host, registry }
    }

    /// Create a factory sharing an existing registry
    pub fn with_registry(host: HostServices, registry: BroadcastRegistry) -> Self {
        Self { host, registry }
    }

    /// The registry shared by every controller this factory creates
    pub fn registry(&self) -> BroadcastRegistry {
        Arc::clone(&self.registry)
    }

    /// Create a popover controller for a trigger element
    pub fn create_popover(
        &self,
        context: TriggerContext,
        trigger: Arc<dyn HostElement>,
        content: Arc<dyn HostElement>,
        options: DeclaredOptions,
    ) -> Result<OverlayController> {
        self.create(OverlayKind::Popover, context, trigger, content, options)
    }

    /// Create a tooltip controller for a trigger element
    pub fn create_tooltip(
        &self,
        context: TriggerContext,
        trigger: Arc<dyn HostElement>,
        content: Arc<dyn HostElement>,
        options: DeclaredOptions,
    ) -> Result<OverlayController> {
        self.create(OverlayKind::Tooltip, context, trigger, content, options)
    }

    fn create(
        &self,
        kind: OverlayKind,
        context: TriggerContext,
        trigger: Arc<dyn HostElement>,
        content: Arc<dyn HostElement>,
        options: DeclaredOptions,
    ) -> Result<OverlayController> {
        let initial_visible = options.visible.unwrap_or(false);
        let config = options.merge(kind, self.host.document.is_touch_capable());
        tracing::debug!(kind = ?kind, placement = ?config.placement, "factory: creating overlay");

        // The content element lives detached from the document until the
        // panel re-attaches it at open time.
        content.detach();

        let controller = OverlayController::create(
            self.host.clone(),
            Arc::clone(&self.registry),
            trigger,
            content,
            config,
            context,
        );

        if initial_visible {
            controller.set_visible(true)?;
        }
        Ok(controller)
    }
}

impl std::fmt::Debug for OverlayFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OverlayFactory { .. }")
    }
}

// =============================================================================
// Tests
// =============================================================================
