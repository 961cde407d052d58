//! Symbolic placement and the position resolver
//!
//! Maps a symbolic placement (top/right/bottom/left) to the class token
//! and anchor descriptor the panel collaborator consumes, and keeps the
//! token on a live panel in sync when the placement changes.

use veil_core::{AnchorDescriptor, AnchorX, AnchorY, PanelHandle};

/// Placement of the overlay relative to the trigger element
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Above the trigger, horizontally centered
    #[default]
    Top,
    /// To the right of the trigger, vertically centered
    Right,
    /// Below the trigger, horizontally centered
    Bottom,
    /// To the left of the trigger, vertically centered
    Left,
}

impl Placement {
    /// Parse a declared placement name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "top" => Some(Self::Top),
            "right" => Some(Self::Right),
            "bottom" => Some(Self::Bottom),
            "left" => Some(Self::Left),
            _ => None,
        }
    }

    /// The declared name for this placement
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Right => "right",
            Self::Bottom => "bottom",
            Self::Left => "left",
        }
    }

    /// Class token applied to the rendered panel
    pub fn class_token(&self) -> &'static str {
        match self {
            Self::Top => "position-top",
            Self::Right => "position-right",
            Self::Bottom => "position-bottom",
            Self::Left => "position-left",
        }
    }

    /// Anchor descriptor for the panel position API
    pub fn anchor(&self) -> AnchorDescriptor {
        match self {
            Self::Top => AnchorDescriptor {
                x: AnchorX::Center,
                y: AnchorY::Above,
            },
            Self::Right => AnchorDescriptor {
                x: AnchorX::AfterEnd,
                y: AnchorY::Center,
            },
            Self::Bottom => AnchorDescriptor {
                x: AnchorX::Center,
                y: AnchorY::Below,
            },
            Self::Left => AnchorDescriptor {
                x: AnchorX::BeforeStart,
                y: AnchorY::Center,
            },
        }
    }
}

// =============================================================================
// PositionResolver
// =============================================================================

/// Resolves the current placement into panel inputs
///
/// Tracks which class token is on the rendered panel so a re-resolution
/// removes the stale token before applying the new one.
#[derive(Debug)]
pub struct PositionResolver {
    placement: Placement,
    applied: Option<&'static str>,
}

impl PositionResolver {
    /// Create a resolver for the given placement
    pub fn new(placement: Placement) -> Self {
        Self {
            placement,
            applied: None,
        }
    }

    /// The current placement
    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Change the placement; takes effect on the next resolve/apply
    pub fn set_placement(&mut self, placement: Placement) {
        self.placement = placement;
    }

    /// Resolve the current placement without touching a panel
    ///
    /// Records the token as applied so panel configuration built from
    /// this resolution stays consistent with later re-applications.
    pub fn resolve(&mut self) -> (&'static str, AnchorDescriptor) {
        let token = self.placement.class_token();
        self.applied = Some(token);
        (token, self.placement.anchor())
    }

    /// Re-resolve against a live panel
    ///
    /// Removes the previously applied token, adds the current one, and
    /// pushes the new anchor descriptor so an open panel repositions
    /// without closing.
    pub fn apply(&mut self, panel: &dyn PanelHandle) {
        if let Some(previous) = self.applied.take() {
            panel.remove_class(previous);
        }
        let (token, anchor) = self.resolve();
        panel.add_class(token);
        panel.update_position(anchor);
    }
}

// =============================================================================
// Tests
// =============================================================================
