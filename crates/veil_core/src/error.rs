//! Error types for veil

use thiserror::Error;

/// Errors that can occur while configuring or opening an overlay
#[derive(Error, Debug)]
pub enum VeilError {
    /// A tooltip was asked to open without any text content
    #[error("tooltip has no text content; include text within the tooltip element")]
    EmptyTooltip,

    /// A popover trigger has no accessible label and no override was supplied
    #[error("popover trigger requires an aria-label or an override label")]
    MissingAriaLabel,

    /// A declared option could not be parsed
    #[error("invalid value for option `{option}`: {message}")]
    InvalidOption {
        /// The declared option name
        option: String,
        /// What was wrong with the value
        message: String,
    },

    /// An option name outside the recognized configuration surface
    #[error("unrecognized option `{0}`")]
    UnknownOption(String),
}

/// Result type for veil operations
pub type Result<T> = std::result::Result<T, VeilError>;
