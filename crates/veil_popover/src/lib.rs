//! Veil Popover Engine
//!
//! Transient overlays (popovers and tooltips) that attach to a trigger
//! element, appear on hover/focus/touch, and disappear on the
//! complementary interaction, outside tap, or scroll:
//!
//! - **Lifecycle Controller**: one FSM per trigger driving open/close
//!   delays, interaction gates, and the panel collaborator
//! - **Position Resolver**: symbolic top/right/bottom/left placements
//!   mapped to class tokens and anchor descriptors
//! - **Factory**: declarative options merged over the defaults table,
//!   one controller per trigger, a shared broadcast registry
//!
//! # Example
//!
//! ```
//! use veil_core::memory::MemoryHost;
//! use veil_core::{Event, HostElement};
//! use veil_popover::{DeclaredOptions, OverlayFactory, TriggerContext};
//!
//! let host = MemoryHost::new();
//! let factory = OverlayFactory::new(host.services());
//!
//! let trigger = host.create_element();
//! let content = host.create_element();
//! content.set_text("Saved!");
//!
//! let tooltip = factory
//!     .create_tooltip(
//!         TriggerContext::new(),
//!         trigger.clone(),
//!         content,
//!         DeclaredOptions::new(),
//!     )
//!     .unwrap();
//!
//! // The host loop delivers events and pumps time.
//! trigger.dispatch(&Event::new("mouseenter"));
//! tooltip.update(0).unwrap();
//! assert!(tooltip.visible());
//! ```

pub mod config;
pub mod controller;
pub mod factory;
pub mod interpolate;
pub mod position;

pub use config::{
    DeclaredOptions, OverlayConfig, OverlayKind, DEFAULT_CLOSE_TRIGGERS, DEFAULT_OPEN_TRIGGERS,
    DEFAULT_Z_INDEX, TOUCH_OPEN_DELAY_MS,
};
pub use controller::{
    LifecycleEvent, OverlayController, OverlayState, PlacementCallback, VisibilityCallback,
};
pub use factory::OverlayFactory;
pub use interpolate::{interpolate, TriggerContext};
pub use position::{Placement, PositionResolver};
