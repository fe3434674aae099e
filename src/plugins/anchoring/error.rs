use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[cfg_attr(feature = "typegen", specta(rename_all = "camelCase"))]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AnchorError {
    EmptySelection { message: String },
    InvalidBoundary { message: String },
    UnknownNode { message: String },
    Markup { message: String },
}

impl AnchorError {
    pub fn empty_selection(message: impl Into<String>) -> Self {
        Self::EmptySelection {
            message: message.into(),
        }
    }

    pub fn invalid_boundary(message: impl Into<String>) -> Self {
        Self::InvalidBoundary {
            message: message.into(),
        }
    }

    pub fn unknown_node(message: impl Into<String>) -> Self {
        Self::UnknownNode {
            message: message.into(),
        }
    }

    pub fn markup(message: impl Into<String>) -> Self {
        Self::Markup {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::EmptySelection { message }
            | Self::InvalidBoundary { message }
            | Self::UnknownNode { message }
            | Self::Markup { message } => message,
        }
    }
}

impl std::fmt::Display for AnchorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySelection { message } => write!(f, "EmptySelection: {}", message),
            Self::InvalidBoundary { message } => write!(f, "InvalidBoundary: {}", message),
            Self::UnknownNode { message } => write!(f, "UnknownNode: {}", message),
            Self::Markup { message } => write!(f, "Markup: {}", message),
        }
    }
}

impl std::error::Error for AnchorError {}
