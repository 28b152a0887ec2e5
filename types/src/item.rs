//! Conversation item domain model.
//!
//! An item is one turn or structural element of a conversation. Items are
//! immutable once appended; the only interior state is the memoized token
//! estimate, which is a pure function of the content.

use std::borrow::Cow;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, Sequence};

/// Structured block kind that marks a tool result inside non-tool roles.
pub const TOOL_RESULT_KIND: &str = "tool_result";

/// Structured block kind carried by compaction records when rendered as items.
pub const COMPACTION_KIND: &str = "compaction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    ToolResult,
    CompactionSummary,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::ToolResult => "tool_result",
            Role::CompactionSummary => "compaction_summary",
        }
    }

    /// Parse a role from its wire name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" | "developer" => Some(Role::System),
            "tool_result" | "tool" => Some(Role::ToolResult),
            "compaction_summary" | "compaction" => Some(Role::CompactionSummary),
            _ => None,
        }
    }
}

/// One block of item content.
///
/// The engine sizes content but never interprets it: structured payloads are
/// measured by their compact JSON rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Structured {
        kind: String,
        payload: serde_json::Value,
    },
}

impl ContentBlock {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    #[must_use]
    pub fn structured(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Structured {
            kind: kind.into(),
            payload,
        }
    }

    /// The text the estimator measures for this block.
    #[must_use]
    pub fn sizing_text(&self) -> Cow<'_, str> {
        match self {
            ContentBlock::Text { text } => Cow::Borrowed(text.as_str()),
            ContentBlock::Structured { payload, .. } => Cow::Owned(payload.to_string()),
        }
    }

    #[must_use]
    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::Structured { kind, .. } if kind == TOOL_RESULT_KIND)
    }
}

/// Caller-assigned retention hint used by selective retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    #[default]
    Routine,
    Important,
}

/// Role, content and importance of an item, before it has an id.
///
/// Collaborators (summarizers) return bodies; the log turns bodies into items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemBody {
    role: Role,
    content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "is_routine")]
    importance: Importance,
}

fn is_routine(importance: &Importance) -> bool {
    *importance == Importance::Routine
}

impl ItemBody {
    #[must_use]
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content,
            importance: Importance::Routine,
        }
    }

    /// Single text block body.
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![ContentBlock::text(text)])
    }

    #[must_use]
    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    #[must_use]
    pub fn important(self) -> Self {
        self.with_importance(Importance::Important)
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &[ContentBlock] {
        &self.content
    }

    #[must_use]
    pub fn importance(&self) -> Importance {
        self.importance
    }

    #[must_use]
    pub fn is_important(&self) -> bool {
        self.importance == Importance::Important
    }

    /// Tool results are marked either by role or by a `tool_result` structured block.
    #[must_use]
    pub fn has_tool_result_marker(&self) -> bool {
        self.role == Role::ToolResult || self.content.iter().any(ContentBlock::is_tool_result)
    }

    /// All blocks rendered as text, joined by newlines.
    #[must_use]
    pub fn plain_text(&self) -> String {
        self.content
            .iter()
            .map(ContentBlock::sizing_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Token estimate for a piece of content.
///
/// `approximate` is set when an exact tokenizer was requested but the
/// heuristic had to be used instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenEstimate {
    pub tokens: u32,
    pub approximate: bool,
}

impl TokenEstimate {
    #[must_use]
    pub const fn exact(tokens: u32) -> Self {
        Self {
            tokens,
            approximate: false,
        }
    }

    #[must_use]
    pub const fn approximate(tokens: u32) -> Self {
        Self {
            tokens,
            approximate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    id: ItemId,
    created_at: Sequence,
    #[serde(flatten)]
    body: ItemBody,
    /// Estimate paired with the key of the estimator that produced it.
    #[serde(skip)]
    estimated_tokens: OnceLock<(u64, TokenEstimate)>,
}

impl PartialEq for ConversationItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.created_at == other.created_at && self.body == other.body
    }
}

impl ConversationItem {
    #[must_use]
    pub fn new(id: ItemId, created_at: Sequence, body: ItemBody) -> Self {
        Self {
            id,
            created_at,
            body,
            estimated_tokens: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ItemId {
        self.id
    }

    #[must_use]
    pub fn created_at(&self) -> Sequence {
        self.created_at
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.body.role()
    }

    #[must_use]
    pub fn content(&self) -> &[ContentBlock] {
        self.body.content()
    }

    #[must_use]
    pub fn importance(&self) -> Importance {
        self.body.importance()
    }

    #[must_use]
    pub fn body(&self) -> &ItemBody {
        &self.body
    }

    #[must_use]
    pub fn cached_estimate(&self) -> Option<TokenEstimate> {
        self.estimated_tokens.get().map(|(_, estimate)| *estimate)
    }

    /// Returns the memoized estimate, computing it with `estimate` on first use.
    ///
    /// The memo belongs to the estimator identified by `key`; any other key
    /// gets a fresh estimate that is not cached. Approximate estimates are
    /// never cached either, so a recovered tokenizer gets a chance to produce
    /// the exact count on a later call.
    pub fn estimated_tokens_with(
        &self,
        key: u64,
        estimate: impl FnOnce(&ItemBody) -> TokenEstimate,
    ) -> TokenEstimate {
        if let Some((owner, cached)) = self.estimated_tokens.get() {
            if *owner == key {
                return *cached;
            }
            return estimate(&self.body);
        }
        let fresh = estimate(&self.body);
        if !fresh.approximate {
            let _ = self.estimated_tokens.set((key, fresh));
        }
        fresh
    }
}
