use serde::{Deserialize, Serialize};

use crate::plugins::anchoring::AnchorError;

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[cfg_attr(feature = "typegen", specta(rename_all = "camelCase"))]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HighlightError {
    EmptySelection { message: String },
    NotFound { message: String },
    InvalidInput { message: String },
    Conflict { message: String },
    Ambiguous { message: String },
    Import { message: String },
    Storage { message: String },
    Host { message: String },
}

impl HighlightError {
    pub fn empty_selection(message: impl Into<String>) -> Self {
        Self::EmptySelection {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn ambiguous(message: impl Into<String>) -> Self {
        Self::Ambiguous {
            message: message.into(),
        }
    }

    pub fn import(message: impl Into<String>) -> Self {
        Self::Import {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::Host {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::EmptySelection { message }
            | Self::NotFound { message }
            | Self::InvalidInput { message }
            | Self::Conflict { message }
            | Self::Ambiguous { message }
            | Self::Import { message }
            | Self::Storage { message }
            | Self::Host { message } => message,
        }
    }
}

impl From<AnchorError> for HighlightError {
    fn from(err: AnchorError) -> Self {
        match err {
            AnchorError::EmptySelection { message } => Self::empty_selection(message),
            other => Self::invalid_input(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for HighlightError {
    fn from(err: serde_json::Error) -> Self {
        Self::import(err.to_string())
    }
}

impl From<std::io::Error> for HighlightError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl std::fmt::Display for HighlightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySelection { message } => write!(f, "EmptySelection: {}", message),
            Self::NotFound { message } => write!(f, "NotFound: {}", message),
            Self::InvalidInput { message } => write!(f, "InvalidInput: {}", message),
            Self::Conflict { message } => write!(f, "Conflict: {}", message),
            Self::Ambiguous { message } => write!(f, "Ambiguous: {}", message),
            Self::Import { message } => write!(f, "Import: {}", message),
            Self::Storage { message } => write!(f, "Storage: {}", message),
            Self::Host { message } => write!(f, "Host: {}", message),
        }
    }
}

impl std::error::Error for HighlightError {}
