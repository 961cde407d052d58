//! Event model shared by trigger elements and the global target
//!
//! Events are identified by their host event name (the same vocabulary
//! the declarative `openTrigger`/`closeTrigger` surface uses), so a
//! subscriber set can be keyed by arbitrary names without a central
//! registration step.

/// Well-known event names used by the default trigger configuration
pub mod event_names {
    /// Pointer entered the trigger bounds
    pub const MOUSE_ENTER: &str = "mouseenter";
    /// Pointer left the trigger bounds
    pub const MOUSE_LEAVE: &str = "mouseleave";
    /// Primary button pressed on the trigger
    pub const MOUSE_DOWN: &str = "mousedown";
    /// Touch gesture started on the trigger
    pub const TOUCH_START: &str = "touchstart";
    /// Touch gesture ended
    pub const TOUCH_END: &str = "touchend";
    /// Touch gesture was cancelled by the host
    pub const TOUCH_CANCEL: &str = "touchcancel";
    /// Trigger received keyboard focus
    pub const FOCUS: &str = "focus";
    /// Trigger lost keyboard focus (also the window-level blur name)
    pub const BLUR: &str = "blur";
    /// Global scroll
    pub const SCROLL: &str = "scroll";
}

/// An event delivered to element or global listeners
///
/// Carries only the event name; overlays key all their behavior off the
/// name and the element the listener was bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    event_type: String,
}

impl Event {
    /// Create an event with the given name
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
        }
    }

    /// The event name, e.g. `mouseenter`
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Check the event name
    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matching() {
        let event = Event::new(event_names::FOCUS);
        assert!(event.is("focus"));
        assert!(!event.is("blur"));
        assert_eq!(event.event_type(), "focus");
    }
}
