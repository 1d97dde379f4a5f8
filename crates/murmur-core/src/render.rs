//! Outbound text rendering.
//!
//! Applies a chat's [`RenderProfile`] to agent output: blocked link and
//! image policies first (the target platform cannot render them), then
//! the output mode (markdown passthrough, basic HTML tags, or plain text
//! via markdown stripping). Command replies are capped at
//! [`COMMAND_REPLY_CAP`] characters.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use pulldown_cmark::{Event, Parser};
use regex::Regex;

use murmur_types::render::{BlockedPolicy, RenderMode, RenderProfile};

/// Command replies are truncated to this many characters.
pub const COMMAND_REPLY_CAP: usize = 1_600;

fn image_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").expect("static regex"))
}

fn link_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\(([^)]*)\)").expect("static regex"))
}

fn bold_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*([^*]+)\*\*").expect("static regex"))
}

fn italic_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*([^*]+)\*").expect("static regex"))
}

fn code_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`([^`]+)`").expect("static regex"))
}

/// Render `text` for one chat according to its profile.
pub fn render_text(text: &str, profile: &RenderProfile) -> String {
    let text = apply_image_policy(text, profile.blocked_image_policy);
    let text = apply_link_policy(&text, profile.blocked_link_policy);

    match profile.mode {
        RenderMode::Markdown => text,
        RenderMode::Html => to_html(&text),
        RenderMode::Plain => to_plain(&text),
    }
}

/// Truncate a command reply to the cap, marking the cut.
pub fn cap_reply(text: &str) -> String {
    if text.chars().count() <= COMMAND_REPLY_CAP {
        return text.to_owned();
    }
    let cut: String = text.chars().take(COMMAND_REPLY_CAP - 1).collect();
    format!("{cut}…")
}

fn apply_image_policy(text: &str, policy: BlockedPolicy) -> String {
    image_pattern()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            match policy {
                BlockedPolicy::Indicator => {
                    if alt.is_empty() {
                        "🖼️".to_string()
                    } else {
                        format!("🖼️ {alt}")
                    }
                }
                BlockedPolicy::Text => alt.to_string(),
                BlockedPolicy::Remove => String::new(),
            }
        })
        .into_owned()
}

fn apply_link_policy(text: &str, policy: BlockedPolicy) -> String {
    link_pattern()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let label = &caps[1];
            match policy {
                BlockedPolicy::Indicator => format!("{label} 🔗"),
                BlockedPolicy::Text => label.to_string(),
                BlockedPolicy::Remove => String::new(),
            }
        })
        .into_owned()
}

fn to_html(text: &str) -> String {
    let text = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    let text = bold_pattern().replace_all(&text, "<b>$1</b>");
    let text = code_pattern().replace_all(&text, "<code>$1</code>");
    let text = italic_pattern().replace_all(&text, "<i>$1</i>");
    text.into_owned()
}

fn to_plain(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for event in Parser::new(text) {
        match event {
            Event::Text(t) | Event::Code(t) => out.push_str(&t),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::End(tag) if is_block_end(&tag) => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
    out.trim_end().to_string()
}

fn is_block_end(tag: &pulldown_cmark::TagEnd) -> bool {
    use pulldown_cmark::TagEnd;
    matches!(
        tag,
        TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item | TagEnd::CodeBlock
    )
}

/// Per-chat render profile store keyed by `(provider, chat_id)`.
#[derive(Default)]
pub struct RenderProfiles {
    profiles: Mutex<HashMap<(String, String), RenderProfile>>,
}

impl RenderProfiles {
    /// Create an empty profile store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The profile for one chat (default when never set).
    pub fn get(&self, provider: &str, chat_id: &str) -> RenderProfile {
        self.profiles
            .lock()
            .expect("render profiles lock")
            .get(&(provider.to_owned(), chat_id.to_owned()))
            .copied()
            .unwrap_or_default()
    }

    /// Replace the profile for one chat.
    pub fn set(&self, provider: &str, chat_id: &str, profile: RenderProfile) {
        self.profiles
            .lock()
            .expect("render profiles lock")
            .insert((provider.to_owned(), chat_id.to_owned()), profile);
    }

    /// Update one chat's profile in place.
    pub fn update(
        &self,
        provider: &str,
        chat_id: &str,
        apply: impl FnOnce(&mut RenderProfile),
    ) -> RenderProfile {
        let mut profiles = self.profiles.lock().expect("render profiles lock");
        let profile = profiles
            .entry((provider.to_owned(), chat_id.to_owned()))
            .or_default();
        apply(profile);
        *profile
    }
}
