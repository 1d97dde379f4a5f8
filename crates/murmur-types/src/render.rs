//! Per-chat render profile types.
//!
//! A [`RenderProfile`] controls how agent output is formatted for one
//! `(provider, chat_id)` pair: output mode plus policies for links and
//! images the target platform blocks.

use serde::{Deserialize, Serialize};

/// Output formatting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Pass markdown through untouched.
    #[default]
    Markdown,
    /// Convert basic marks to HTML tags.
    Html,
    /// Strip formatting to plain text.
    Plain,
}

/// What to do with links or images the platform blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedPolicy {
    /// Replace with a short indicator marker.
    #[default]
    Indicator,
    /// Keep the visible text, drop the target.
    Text,
    /// Remove entirely.
    Remove,
}

/// Formatting policy for one chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderProfile {
    /// Output mode.
    #[serde(default)]
    pub mode: RenderMode,

    /// Policy for blocked links.
    #[serde(default)]
    pub blocked_link_policy: BlockedPolicy,

    /// Policy for blocked images.
    #[serde(default)]
    pub blocked_image_policy: BlockedPolicy,
}

impl RenderMode {
    /// Parse a user-supplied mode name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Some(Self::Markdown),
            "html" => Some(Self::Html),
            "plain" | "text" => Some(Self::Plain),
            _ => None,
        }
    }
}

impl BlockedPolicy {
    /// Parse a user-supplied policy name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "indicator" => Some(Self::Indicator),
            "text" => Some(Self::Text),
            "remove" => Some(Self::Remove),
            _ => None,
        }
    }
}
