//! Veil Core
//!
//! This crate provides the foundational primitives for the Veil overlay
//! library:
//!
//! - **Host Capabilities**: trait seams for the element tree, document,
//!   panel renderer, and structural observation supplied by the host
//! - **Event Model**: the event-name vocabulary shared by triggers and
//!   the global target
//! - **Broadcast Registry**: de-duplicated global listener registration
//!   that dispatches one underlying event to many logical subscribers
//! - **Memory Host**: an in-memory host implementation for headless use
//!   and tests
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use veil_core::memory::MemoryHost;
//! use veil_core::registry::{broadcast_registry, BroadcastRegistryExt};
//! use veil_core::events::{event_names, Event};
//!
//! let host = MemoryHost::new();
//! let registry = broadcast_registry(host.window());
//!
//! let handler: veil_core::GlobalHandler = Arc::new(|_event: &Event| {});
//! registry.register(event_names::SCROLL, true, handler.clone());
//!
//! host.emit_window(event_names::SCROLL);
//! registry.deregister(event_names::SCROLL, true, &handler);
//! ```

pub mod error;
pub mod events;
pub mod host;
pub mod memory;
pub mod registry;

pub use error::{Result, VeilError};
pub use events::{event_names, Event};
pub use host::{
    AnchorDescriptor, AnchorX, AnchorY, AttributeMutation, BindingId, DocumentHost, EventCallback,
    GlobalTarget, HostElement, HostServices, ListenerHandle, MutationCallback, ObserverHandle,
    PanelAnimation, PanelConfig, PanelContent, PanelHandle, PanelHost, StructuralObservation,
};
pub use registry::{broadcast_registry, BroadcastRegistry, BroadcastRegistryExt, GlobalHandler};
