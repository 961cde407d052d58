//! Host capability traits
//!
//! Veil never talks to a concrete UI host directly. Everything it needs
//! from the environment comes through the seams in this module:
//!
//! - [`GlobalTarget`] — the window-level event target the broadcast
//!   registry attaches its single underlying listener to
//! - [`HostElement`] — a trigger or content element: event binding,
//!   attributes, focus, text content
//! - [`DocumentHost`] — document-wide one-shot listeners and device
//!   capability probes
//! - [`PanelHost`] / [`PanelHandle`] — the opaque renderer that mounts
//!   content at an anchored position and animates it in and out
//! - [`StructuralObservation`] — attribute mutation observation, with
//!   graceful degradation when the host cannot provide it
//!
//! The [`crate::memory`] module implements all of these in memory.

use std::sync::Arc;

use crate::events::Event;

/// Callback invoked with a delivered event
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle for an underlying listener on the global target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub u64);

/// Handle for a listener bound to a single element
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindingId(pub u64);

/// Handle for a structural observer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverHandle(pub u64);

// =============================================================================
// Global target
// =============================================================================

/// The window-level event target
///
/// The broadcast registry is the only intended consumer; it attaches at
/// most one listener per `(event_type, capture)` pair.
pub trait GlobalTarget: Send + Sync {
    /// Attach a listener for the given event name
    fn add_listener(&self, event_type: &str, capture: bool, dispatch: EventCallback)
        -> ListenerHandle;

    /// Detach a previously attached listener
    fn remove_listener(&self, handle: ListenerHandle);
}

// =============================================================================
// Elements and document
// =============================================================================

/// A single element in the host tree
///
/// Implementations are cheap shared handles; overlays hold them as
/// `Arc<dyn HostElement>` for the lifetime of the controller.
pub trait HostElement: Send + Sync {
    /// Bind a listener for the given event name
    fn on(&self, event_type: &str, callback: EventCallback) -> BindingId;

    /// Unbind a listener; unknown ids are a no-op
    fn off(&self, binding: BindingId);

    /// Deliver an event to every listener bound for its name
    fn dispatch(&self, event: &Event);

    /// Read an attribute
    fn attribute(&self, name: &str) -> Option<String>;

    /// Write an attribute
    fn set_attribute(&self, name: &str, value: &str);

    /// Remove an attribute; absent attributes are a no-op
    fn remove_attribute(&self, name: &str);

    /// Whether the element currently carries a `disabled` attribute
    fn is_disabled(&self) -> bool;

    /// The element's literal text content
    fn text_content(&self) -> String;

    /// Whether the element currently holds keyboard focus
    fn has_focus(&self) -> bool;

    /// Remove the element from the document flow
    ///
    /// Detached elements keep their attributes, listeners, and text; the
    /// panel collaborator re-attaches content at open time.
    fn detach(&self);
}

/// Document-wide services
pub trait DocumentHost: Send + Sync {
    /// Bind a one-shot document-level listener, consumed on first delivery
    fn once(&self, event_type: &str, callback: EventCallback);

    /// Whether the device reports touch capability
    fn is_touch_capable(&self) -> bool;
}

// =============================================================================
// Panel collaborator
// =============================================================================

/// Horizontal anchor reference for the panel position API
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnchorX {
    /// Horizontally centered on the trigger
    Center,
    /// Past the trigger's end edge
    AfterEnd,
    /// Before the trigger's start edge
    BeforeStart,
}

/// Vertical anchor reference for the panel position API
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnchorY {
    /// Above the trigger
    Above,
    /// Vertically centered on the trigger
    Center,
    /// Below the trigger
    Below,
}

/// Anchor-relative position descriptor consumed by the panel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AnchorDescriptor {
    /// Horizontal reference
    pub x: AnchorX,
    /// Vertical reference
    pub y: AnchorY,
}

/// Animation class tokens for panel enter/exit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PanelAnimation {
    /// Token applied while animating in
    pub open: String,
    /// Token applied while animating out
    pub close: String,
}

/// Content handed to the panel at creation time
#[derive(Clone)]
pub enum PanelContent {
    /// A detached content element, re-attached by the panel
    Element(Arc<dyn HostElement>),
    /// Literal text (tooltip variant)
    Text(String),
}

impl std::fmt::Debug for PanelContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PanelContent::Element(_) => f.write_str("PanelContent::Element(..)"),
            PanelContent::Text(text) => f.debug_tuple("PanelContent::Text").field(text).finish(),
        }
    }
}

/// Configuration for a panel instance
#[derive(Clone, Debug)]
pub struct PanelConfig {
    /// Unique panel id, e.g. `popover-3`
    pub id: String,
    /// Class tokens applied to the rendered element
    pub class_list: Vec<String>,
    /// Stacking level
    pub z_index: u32,
    /// Anchor-relative position
    pub position: AnchorDescriptor,
    /// Enter/exit animation tokens; `None` renders without animation
    pub animation: Option<PanelAnimation>,
    /// Attach the rendered element to the document root
    pub attach_to_root: bool,
    /// Let pointer events pass through the panel container
    pub propagate_container_events: bool,
    /// Whether the panel grabs focus when it opens
    pub focus_on_open: bool,
    /// The content to mount
    pub content: PanelContent,
}

/// A rendered panel instance
///
/// Exclusively owned by one overlay controller; the handle survives
/// open/hide cycles and is destroyed on controller teardown.
pub trait PanelHandle: Send + Sync {
    /// Render and animate in; `on_ready` fires when both complete
    fn open(&self, on_ready: Box<dyn FnOnce() + Send>);

    /// Animate out and hide; a hidden panel can be opened again
    fn hide(&self);

    /// Move an open panel to a new anchor position without closing it
    fn update_position(&self, anchor: AnchorDescriptor);

    /// Add a class token to the rendered element
    fn add_class(&self, class: &str);

    /// Remove a class token from the rendered element
    fn remove_class(&self, class: &str);

    /// Write an attribute on the rendered element
    fn set_attribute(&self, name: &str, value: &str);

    /// Tear the panel down; the handle is inert afterwards
    fn destroy(&self);
}

/// Factory for panel instances
pub trait PanelHost: Send + Sync {
    /// Create a panel for the given configuration
    fn create_panel(&self, config: PanelConfig) -> Arc<dyn PanelHandle>;
}

// =============================================================================
// Structural observation
// =============================================================================

/// A single observed attribute mutation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeMutation {
    /// Name of the attribute that changed
    pub attribute: String,
}

/// Callback invoked with a batch of attribute mutations
pub type MutationCallback = Arc<dyn Fn(&[AttributeMutation]) + Send + Sync>;

/// Attribute mutation observation capability
///
/// Hosts that cannot observe mutations return `None` from
/// [`StructuralObservation::observe_attributes`]; callers fall back to
/// always-active watching. The unavailability is recovered locally and
/// never surfaced.
pub trait StructuralObservation: Send + Sync {
    /// Observe attribute mutations on an element
    ///
    /// Returns `None` when the capability is unavailable.
    fn observe_attributes(
        &self,
        element: &Arc<dyn HostElement>,
        callback: MutationCallback,
    ) -> Option<ObserverHandle>;

    /// Disconnect an observer; unknown handles are a no-op
    fn disconnect(&self, handle: ObserverHandle);
}

// =============================================================================
// Capability bundle
// =============================================================================

/// The full set of host capabilities an overlay needs
///
/// Cloning shares the underlying services.
#[derive(Clone)]
pub struct HostServices {
    /// Window-level event target
    pub window: Arc<dyn GlobalTarget>,
    /// Document-wide services
    pub document: Arc<dyn DocumentHost>,
    /// Panel renderer
    pub panels: Arc<dyn PanelHost>,
    /// Attribute mutation observation
    pub observation: Arc<dyn StructuralObservation>,
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HostServices { .. }")
    }
}
