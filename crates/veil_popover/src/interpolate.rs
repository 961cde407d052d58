//! Label interpolation against the trigger's data context
//!
//! Override labels may contain `{{ key }}` placeholders which are
//! replaced with the trigger context's bindings before the label is
//! written onto the trigger. Unknown keys interpolate to the empty
//! string.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use rustc_hash::FxHashMap;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][\w.]*)\s*\}\}").unwrap());

/// Data bindings available to a trigger's labels
#[derive(Clone, Debug, Default)]
pub struct TriggerContext {
    bindings: FxHashMap<String, String>,
}

impl TriggerContext {
    /// An empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding, builder-style
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.bindings.insert(key.into(), value.into());
        self
    }

    /// Add a binding
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.bindings.insert(key.into(), value.into());
    }

    /// Look up a binding
    pub fn get(&self, key: &str) -> Option<&str> {
        self.bindings.get(key).map(String::as_str)
    }
}

/// Replace `{{ key }}` placeholders with context bindings
pub fn interpolate(template: &str, context: &TriggerContext) -> String {
    PLACEHOLDER
        .replace_all(template, |captures: &Captures<'_>| {
            context.get(&captures[1]).unwrap_or_default().to_owned()
        })
        .into_owned()
}
