//! Boundary to the chat application that renders transcripts.
//!
//! The host owns owner/transcript identity, the message list and the rendered message trees.
//! Everything the highlighter needs from it goes through `ChatHost` and `Notifier`.

use serde::{Deserialize, Serialize};

use crate::plugins::anchoring::markup::{inner_markup, parse_fragment};
use crate::plugins::anchoring::{AnchorError, ContentTree, NodeId};
use crate::plugins::highlights::{HighlightError, OwnerDirectory};

/// One message of the live transcript, as the host stores it.
#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMessage {
    pub name: String,
    pub is_user: bool,
    #[serde(default)]
    pub is_system: bool,
    /// Raw message text (before rendering).
    pub text: String,
    /// Currently displayed variant ("swipe").
    #[serde(default)]
    pub active_variant: u32,
}

impl HostMessage {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_user: false,
            is_system: false,
            text: text.into(),
            active_variant: 0,
        }
    }

    pub fn from_user(mut self) -> Self {
        self.is_user = true;
        self
    }
}

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerProfile {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
}

impl OwnerProfile {
    /// `name|avatar`, used to notice profile edits.
    pub fn cache_key(&self) -> String {
        format!("{}|{}", self.name, self.avatar.as_deref().unwrap_or_default())
    }
}

/// A rendered message body: the tree plus the text container inside it.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub tree: ContentTree,
    pub container: NodeId,
}

impl RenderedMessage {
    pub fn new(tree: ContentTree, container: NodeId) -> Self {
        Self { tree, container }
    }

    /// Parse rendered markup into a `div.mes_text` container.
    pub fn from_markup(markup: &str) -> Result<Self, AnchorError> {
        let tree = parse_fragment(markup)?;
        let container = tree.root();
        Ok(Self { tree, container })
    }

    /// Markup of the container's content, decorations included, for writing back to the host.
    pub fn markup(&self) -> String {
        inner_markup(&self.tree, self.container)
    }
}

pub trait ChatHost: OwnerDirectory {
    fn current_owner(&self) -> Option<String>;

    fn current_transcript(&self) -> Option<String>;

    /// The live message list, in transcript order.
    fn messages(&self) -> &[HostMessage];

    fn owner_profile(&self, owner: &str) -> Option<OwnerProfile>;

    /// Ids of every owner whose display name is `name`.
    fn owners_named(&self, name: &str) -> Vec<String>;

    /// Indices of messages currently rendered (lazy loading may leave gaps).
    fn rendered_indices(&self) -> Vec<usize>;

    fn rendered(&self, index: usize) -> Option<&RenderedMessage>;

    fn rendered_mut(&mut self, index: usize) -> Option<&mut RenderedMessage>;

    fn switch_owner(&mut self, owner: &str) -> Result<(), HighlightError>;

    fn switch_transcript(&mut self, transcript: &str) -> Result<(), HighlightError>;

    /// Ask the host to render a message that is not loaded yet.
    fn load_message(&mut self, index: usize) -> Result<(), HighlightError>;

    /// Scroll to a message and flash the annotation span (or the message when `None`).
    fn reveal(&mut self, index: usize, annotation_id: Option<&str>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Transient user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: Option<String>,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            title: None,
            message: message.into(),
        }
    }
}

pub trait Notifier {
    fn notify(&self, notice: Notice);

    /// Modal confirmation for destructive actions.
    fn confirm(&self, prompt: &str) -> bool;
}
