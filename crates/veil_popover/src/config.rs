//! Overlay configuration: defaults, declared options, and merging
//!
//! The host composition layer collects declarative options (attribute
//! strings, builder calls) into [`DeclaredOptions`]; merging them over
//! the defaults table produces the immutable [`OverlayConfig`] a
//! controller runs with.

use veil_core::{Result, VeilError};

use crate::position::Placement;

/// Default stacking level
pub const DEFAULT_Z_INDEX: u32 = 100;

/// Default open delay on touch-capable devices
pub const TOUCH_OPEN_DELAY_MS: u64 = 75;

/// Default open trigger list
pub const DEFAULT_OPEN_TRIGGERS: &str = "mouseenter touchstart focus";

/// Default close trigger list
pub const DEFAULT_CLOSE_TRIGGERS: &str = "mouseleave touchcancel blur";

// =============================================================================
// OverlayKind
// =============================================================================

/// Which overlay variant a trigger hosts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OverlayKind {
    /// Rich interactive content
    Popover,
    /// Literal text content
    Tooltip,
}

impl OverlayKind {
    /// Base class token for the rendered panel
    pub fn base_class(&self) -> &'static str {
        match self {
            OverlayKind::Popover => "veil-popover",
            OverlayKind::Tooltip => "veil-tooltip",
        }
    }

    /// ARIA role written onto the rendered element
    pub fn role(&self) -> &'static str {
        match self {
            OverlayKind::Popover => "popover",
            OverlayKind::Tooltip => "tooltip",
        }
    }

    /// Panel id prefix, e.g. `popover-7`
    pub fn id_prefix(&self) -> &'static str {
        match self {
            OverlayKind::Popover => "popover",
            OverlayKind::Tooltip => "tooltip",
        }
    }

    /// Default placement for this variant
    pub fn default_placement(&self) -> Placement {
        match self {
            OverlayKind::Popover => Placement::Top,
            OverlayKind::Tooltip => Placement::Bottom,
        }
    }
}

// =============================================================================
// OverlayConfig
// =============================================================================

/// Immutable configuration for one overlay controller
///
/// Built by [`DeclaredOptions::merge`]; the externally observable
/// `visible` state is owned by the controller, not the config.
#[derive(Clone, Debug)]
pub struct OverlayConfig {
    /// Overlay variant
    pub kind: OverlayKind,
    /// Stacking level for the rendered panel
    pub z_index: u32,
    /// Whether open triggers are live
    pub enabled: bool,
    /// Whether the panel animates in and out
    pub animated: bool,
    /// Custom class token added to the rendered panel
    pub popover_class: String,
    /// Event names that request an open
    pub open_triggers: Vec<String>,
    /// Event names that request a close
    pub close_triggers: Vec<String>,
    /// Delay before an open commits
    pub open_delay_ms: u64,
    /// Delay before a close commits
    pub close_delay_ms: u64,
    /// Symbolic placement relative to the trigger
    pub placement: Placement,
    /// Close even while the trigger keeps keyboard focus
    pub auto_hide: bool,
    /// Override label interpolated onto the trigger at open time
    pub label_override: Option<String>,
}

impl OverlayConfig {
    fn defaults(kind: OverlayKind) -> Self {
        Self {
            kind,
            z_index: DEFAULT_Z_INDEX,
            enabled: true,
            animated: true,
            popover_class: String::new(),
            open_triggers: split_triggers(DEFAULT_OPEN_TRIGGERS),
            close_triggers: split_triggers(DEFAULT_CLOSE_TRIGGERS),
            open_delay_ms: 0,
            close_delay_ms: 0,
            placement: kind.default_placement(),
            auto_hide: false,
            label_override: None,
        }
    }

    /// Default popover configuration
    pub fn popover() -> Self {
        Self::defaults(OverlayKind::Popover)
    }

    /// Default tooltip configuration
    pub fn tooltip() -> Self {
        Self::defaults(OverlayKind::Tooltip)
    }
}

fn split_triggers(list: &str) -> Vec<String> {
    list.split_whitespace().map(str::to_owned).collect()
}

// =============================================================================
// DeclaredOptions
// =============================================================================

/// The declarative configuration surface
///
/// Every field is optional; unset fields fall back to the defaults
/// table when merged. String values arrive through [`DeclaredOptions::set`]
/// using the recognized option names (`zIndex`, `openTrigger`, ...).
#[derive(Clone, Debug, Default)]
pub struct DeclaredOptions {
    /// Stacking level
    pub z_index: Option<u32>,
    /// Whether open triggers are live
    pub enabled: Option<bool>,
    /// Initial visibility (two-way surface; applied by the factory)
    pub visible: Option<bool>,
    /// Custom class token
    pub popover_class: Option<String>,
    /// Whether the panel animates
    pub animated: Option<bool>,
    /// Space-separated open trigger list
    pub open_trigger: Option<String>,
    /// Space-separated close trigger list
    pub close_trigger: Option<String>,
    /// Open delay in milliseconds
    pub open_delay_ms: Option<u64>,
    /// Close delay in milliseconds
    pub close_delay_ms: Option<u64>,
    /// Symbolic placement
    pub position: Option<Placement>,
    /// Close even while the trigger keeps focus
    pub auto_hide: Option<bool>,
    /// Override label for the trigger
    pub label: Option<String>,
}

impl DeclaredOptions {
    /// Empty options: merging yields the defaults table
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a declared option by its recognized name
    ///
    /// Presence-style booleans (`autoHide`) treat an empty value as
    /// `true`.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "zIndex" => self.z_index = Some(parse_number(name, value)?),
            "enabled" => self.enabled = Some(parse_bool(name, value)?),
            "visible" => self.visible = Some(parse_bool(name, value)?),
            "popoverClass" => self.popover_class = Some(value.to_owned()),
            "animated" => self.animated = Some(parse_bool(name, value)?),
            "openTrigger" => self.open_trigger = Some(value.to_owned()),
            "closeTrigger" => self.close_trigger = Some(value.to_owned()),
            "openDelay" => self.open_delay_ms = Some(parse_number(name, value)?),
            "closeDelay" => self.close_delay_ms = Some(parse_number(name, value)?),
            "position" => {
                self.position =
                    Some(
                        Placement::parse(value).ok_or_else(|| VeilError::InvalidOption {
                            option: name.to_owned(),
                            message: format!("expected top|right|bottom|left, got `{value}`"),
                        })?,
                    );
            }
            "autoHide" => self.auto_hide = Some(parse_bool(name, value)?),
            "label" => self.label = Some(value.to_owned()),
            other => return Err(VeilError::UnknownOption(other.to_owned())),
        }
        Ok(())
    }

    /// Build options from declared `(name, value)` pairs
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let mut options = Self::new();
        for (name, value) in pairs {
            options.set(name, value)?;
        }
        Ok(options)
    }

    /// Merge these options over the defaults table for `kind`
    ///
    /// `touch_capable` selects the touch open-delay default when no
    /// explicit delay was declared.
    pub fn merge(self, kind: OverlayKind, touch_capable: bool) -> OverlayConfig {
        let mut config = OverlayConfig::defaults(kind);

        if let Some(z_index) = self.z_index {
            config.z_index = z_index;
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(animated) = self.animated {
            config.animated = animated;
        }
        if let Some(popover_class) = self.popover_class {
            config.popover_class = popover_class;
        }
        if let Some(open_trigger) = &self.open_trigger {
            config.open_triggers = split_triggers(open_trigger);
        }
        if let Some(close_trigger) = &self.close_trigger {
            config.close_triggers = split_triggers(close_trigger);
        }
        config.open_delay_ms = match self.open_delay_ms {
            Some(delay) => delay,
            None if touch_capable => TOUCH_OPEN_DELAY_MS,
            None => 0,
        };
        if let Some(close_delay) = self.close_delay_ms {
            config.close_delay_ms = close_delay;
        }
        if let Some(position) = self.position {
            config.placement = position;
        }
        if let Some(auto_hide) = self.auto_hide {
            config.auto_hide = auto_hide;
        }
        config.label_override = self.label;

        config
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value {
        // Attribute presence without a value means true.
        "" | "true" => Ok(true),
        "false" => Ok(false),
        other => Err(VeilError::InvalidOption {
            option: name.to_owned(),
            message: format!("expected a boolean, got `{other}`"),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| VeilError::InvalidOption {
        option: name.to_owned(),
        message: format!("expected a non-negative number, got `{value}`"),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_table() {
        let config = OverlayConfig::popover();
        assert_eq!(config.z_index, 100);
        assert!(config.enabled);
        assert!(config.animated);
        assert_eq!(
            config.open_triggers,
            vec!["mouseenter", "touchstart", "focus"]
        );
        assert_eq!(
            config.close_triggers,
            vec!["mouseleave", "touchcancel", "blur"]
        );
        assert_eq!(config.open_delay_ms, 0);
        assert_eq!(config.close_delay_ms, 0);
        assert!(!config.auto_hide);
    }

    #[test]
    fn test_placement_defaults_per_kind() {
        assert_eq!(OverlayConfig::popover().placement, Placement::Top);
        assert_eq!(OverlayConfig::tooltip().placement, Placement::Bottom);
    }

    #[test]
    fn test_touch_open_delay_default() {
        let config = DeclaredOptions::new().merge(OverlayKind::Tooltip, true);
        assert_eq!(config.open_delay_ms, TOUCH_OPEN_DELAY_MS);

        // An explicit delay wins over the touch default.
        let mut options = DeclaredOptions::new();
        options.open_delay_ms = Some(10);
        let config = options.merge(OverlayKind::Tooltip, true);
        assert_eq!(config.open_delay_ms, 10);
    }

    #[test]
    fn test_from_pairs_parses_surface() {
        let options = DeclaredOptions::from_pairs([
            ("zIndex", "250"),
            ("openTrigger", "click focus"),
            ("closeTrigger", "blur"),
            ("openDelay", "120"),
            ("position", "left"),
            ("autoHide", ""),
            ("popoverClass", "billing-hint"),
        ])
        .unwrap();

        let config = options.merge(OverlayKind::Popover, false);
        assert_eq!(config.z_index, 250);
        assert_eq!(config.open_triggers, vec!["click", "focus"]);
        assert_eq!(config.close_triggers, vec!["blur"]);
        assert_eq!(config.open_delay_ms, 120);
        assert_eq!(config.placement, Placement::Left);
        assert!(config.auto_hide);
        assert_eq!(config.popover_class, "billing-hint");
    }

    #[test]
    fn test_invalid_option_values_are_rejected() {
        let mut options = DeclaredOptions::new();
        assert!(matches!(
            options.set("openDelay", "soon"),
            Err(VeilError::InvalidOption { .. })
        ));
        assert!(matches!(
            options.set("position", "diagonal"),
            Err(VeilError::InvalidOption { .. })
        ));
        assert!(matches!(
            options.set("mdZIndex", "3"),
            Err(VeilError::UnknownOption(_))
        ));
    }
}
