//! Turns and the tagged content-block variants nested inside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One block of assistant (or tool) content within a turn.
///
/// A closed, tagged variant mirroring the transcript's content-block
/// union: `text`, `tool_use`, `tool_result`, and `thinking`. Unknown block
/// kinds are dropped by the parser rather than represented here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain prose, either from the user or the assistant.
    Text {
        /// The block's text content.
        text: String,
    },
    /// An assistant-issued tool invocation.
    ToolUse {
        /// Tool name invoked.
        name: String,
        /// JSON-encoded input the tool was called with.
        input: String,
    },
    /// The result returned by a previously invoked tool.
    ToolResult {
        /// Output text, truncated or raw as the transcript recorded it.
        content: String,
        /// Whether the tool call failed.
        #[serde(default)]
        is_error: bool,
    },
    /// An assistant "thinking" block.
    Thinking {
        /// The reasoning text.
        text: String,
    },
}

impl ContentBlock {
    /// The textual content of this block, regardless of kind, used for
    /// chunk packing and extractor scans.
    #[must_use]
    pub fn text_content(&self) -> &str {
        match self {
            ContentBlock::Text { text }
            | ContentBlock::Thinking { text } => text,
            ContentBlock::ToolUse { input, .. } => input,
            ContentBlock::ToolResult { content, .. } => content,
        }
    }

    /// Whether this block represents a code fence inside a text block.
    /// Tool-use/tool-result blocks are counted separately via
    /// [`Turn::tool_use_count`].
    #[must_use]
    pub fn code_block_count(&self) -> usize {
        match self {
            ContentBlock::Text { text } | ContentBlock::Thinking { text } => {
                text.matches("```").count() / 2
            }
            _ => 0,
        }
    }
}

/// One user message plus the immediately following run of assistant
/// messages (with any tool-use/tool-result exchanges), as reconstructed
/// by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Index of this turn within its session, 0-based, monotone.
    pub index: usize,
    /// Timestamp of the triggering user message.
    pub timestamp: DateTime<Utc>,
    /// The user's message text.
    pub user_text: String,
    /// Ordered assistant-side content blocks for this turn.
    pub assistant_blocks: Vec<ContentBlock>,
    /// Sub-agent name if this turn belongs to a sub-agent transcript.
    pub agent_id: Option<String>,
    /// 0 for the main session, >=1 for sub-agent transcripts.
    pub spawn_depth: u32,
}

impl Turn {
    /// Number of code fences across all assistant text/thinking blocks.
    #[must_use]
    pub fn code_block_count(&self) -> usize {
        self.assistant_blocks
            .iter()
            .map(ContentBlock::code_block_count)
            .sum()
    }

    /// Number of tool-use blocks in this turn.
    #[must_use]
    pub fn tool_use_count(&self) -> usize {
        self.assistant_blocks
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolUse { .. }))
            .count()
    }

    /// Concatenated text used for chunk content and extractor scans:
    /// the user's message followed by every assistant block's text.
    #[must_use]
    pub fn full_text(&self) -> String {
        self.full_text_with(true)
    }

    /// Same as [`Turn::full_text`] but optionally drops `thinking` blocks,
    /// used when the chunker is configured to exclude them.
    #[must_use]
    pub fn full_text_with(&self, include_thinking: bool) -> String {
        let mut out = String::with_capacity(self.user_text.len() + 256);
        out.push_str(&self.user_text);
        for block in &self.assistant_blocks {
            if !include_thinking && matches!(block, ContentBlock::Thinking { .. }) {
                continue;
            }
            out.push('\n');
            out.push_str(block.text_content());
        }
        out
    }
}
