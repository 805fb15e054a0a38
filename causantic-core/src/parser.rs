//! Reads a newline-delimited JSON transcript and reconstructs the
//! user/assistant turn sequence.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::{Error, Result};
use crate::types::{ContentBlock, Turn};

/// Transcripts larger than this are read line-by-line instead of loaded
/// whole, bounding peak memory.
pub const STREAMING_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

/// Raw message role as recorded in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A user-authored message.
    User,
    /// An assistant-authored message.
    Assistant,
}

#[derive(Debug, Clone, Deserialize)]
struct RawBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    input: serde_json::Value,
    #[serde(default)]
    content: serde_json::Value,
    #[serde(default)]
    is_error: bool,
}

impl RawBlock {
    fn into_content_block(self) -> Option<ContentBlock> {
        match self.kind.as_str() {
            "text" => Some(ContentBlock::Text { text: self.text }),
            "thinking" => Some(ContentBlock::Thinking { text: self.text }),
            "tool_use" => Some(ContentBlock::ToolUse {
                name: self.name,
                input: self.input.to_string(),
            }),
            "tool_result" => {
                let content = match &self.content {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                Some(ContentBlock::ToolResult {
                    content,
                    is_error: self.is_error,
                })
            }
            _ => None,
        }
    }
}

/// One raw transcript record, a line of the newline-delimited JSON input.
/// Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
struct RawRecord {
    role: Option<Role>,
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    content: Vec<RawBlock>,
    session_id: Option<String>,
    #[serde(alias = "cwd", default)]
    working_directory: Option<String>,
    #[serde(default)]
    is_sidechain: bool,
    /// Identifies which sub-agent transcript this record belongs to, if
    /// any; absent on the main session's records.
    #[serde(default)]
    agent_id: Option<String>,
    /// Marks a record as the point where a sub-agent was spawned or
    /// returned control, so sidechain filtering can keep these even
    /// though they are otherwise noise.
    #[serde(default)]
    progress_marker: Option<ProgressMarker>,
    /// File/record identifier of a spawned sub-agent transcript, present
    /// on a `spawn` progress marker.
    #[serde(default)]
    sub_agent_ref: Option<String>,
}

/// Sub-agent lifecycle markers the parser keeps even when filtering
/// sidechain noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMarker {
    /// A sub-agent was spawned from this point.
    Spawn,
    /// A sub-agent returned control at this point.
    Return,
}

/// Minimum line count a discovered sub-agent file must have, below which
/// it is treated as a dead end and skipped.
pub const DEAD_END_LINE_THRESHOLD: usize = 3;

/// A fully parsed transcript: the reconstructed turn sequence plus the
/// session identity derived from its earliest records.
#[derive(Debug, Clone)]
pub struct ParsedSession {
    /// Session identifier read from the transcript.
    pub session_id: String,
    /// Absolute working-directory path read from the first record.
    pub project_path: String,
    /// Project slug derived from `project_path`'s last path segment.
    pub project_slug: String,
    /// Reconstructed turns, in ascending index order.
    pub turns: Vec<Turn>,
    /// Sub-agent transcript references discovered while scanning, keyed
    /// by the file/record identifier the orchestrator should process
    /// next (depth-first), paired with the turn index of the spawn
    /// point in this session.
    pub sub_agent_refs: Vec<(String, usize)>,
}

/// Derives a project slug from a working-directory path: the last path
/// segment, lowercased and with non-alphanumeric runs collapsed to `-`.
#[must_use]
pub fn slug_from_path(path: &str) -> String {
    let last = Path::new(path)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());
    normalize_slug(&last)
}

/// Disambiguates a slug against previously seen `(slug, path)` pairs by
/// appending a parent path segment when two distinct paths would
/// otherwise collide on the same slug.
#[must_use]
pub fn disambiguate_slug(
    path: &str,
    base_slug: &str,
    seen: &HashMap<String, String>,
) -> String {
    match seen.get(base_slug) {
        Some(existing_path) if existing_path != path => {
            let parent_segment = Path::new(path)
                .parent()
                .and_then(|p| p.file_name())
                .map(|s| s.to_string_lossy().to_string());
            match parent_segment {
                Some(parent) => format!("{}-{}", normalize_slug(&parent), base_slug),
                None => base_slug.to_string(),
            }
        }
        _ => base_slug.to_string(),
    }
}

fn normalize_slug(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut last_was_dash = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !slug.is_empty() {
            slug.push('-');
            last_was_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Closed-lexicon check for whether a record counts as noise: sidechain
/// records are filtered at the message level by default, except those
/// carrying a sub-agent spawn/return marker, which are always kept.
fn is_noise(record: &RawRecord) -> bool {
    record.is_sidechain && record.progress_marker.is_none()
}

struct Accumulator {
    session_id: Option<String>,
    project_path: Option<String>,
    turns: Vec<Turn>,
    pending_user: Option<(usize, DateTime<Utc>, String, Option<String>, u32)>,
    pending_blocks: Vec<ContentBlock>,
    next_index: usize,
    sub_agent_refs: Vec<(String, usize)>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            session_id: None,
            project_path: None,
            turns: Vec::new(),
            pending_user: None,
            pending_blocks: Vec::new(),
            next_index: 0,
            sub_agent_refs: Vec::new(),
        }
    }

    fn flush_pending(&mut self) {
        if let Some((index, timestamp, user_text, agent_id, spawn_depth)) = self.pending_user.take() {
            self.turns.push(Turn {
                index,
                timestamp,
                user_text,
                assistant_blocks: std::mem::take(&mut self.pending_blocks),
                agent_id,
                spawn_depth,
            });
        }
        self.pending_blocks.clear();
    }

    fn ingest_line(&mut self, line: &str) {
        let record: RawRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(_) => return,
        };

        if self.session_id.is_none() {
            if let Some(sid) = &record.session_id {
                self.session_id = Some(sid.clone());
            }
        }
        if self.project_path.is_none() {
            if let Some(wd) = &record.working_directory {
                self.project_path = Some(wd.clone());
            }
        }

        if is_noise(&record) {
            return;
        }

        let spawn_depth = u32::from(record.agent_id.is_some());

        match record.role {
            Some(Role::User) => {
                self.flush_pending();
                let text = record
                    .content
                    .iter()
                    .filter(|b| b.kind == "text")
                    .map(|b| b.text.clone())
                    .collect::<Vec<_>>()
                    .join("\n");
                let index = self.next_index;
                self.next_index += 1;
                self.pending_user = Some((
                    index,
                    record.timestamp.unwrap_or_else(Utc::now),
                    text,
                    record.agent_id.clone(),
                    spawn_depth,
                ));
            }
            Some(Role::Assistant) => {
                if self.pending_user.is_none() {
                    // Assistant message with no preceding user turn (e.g. a
                    // system-initiated sub-agent greeting): open a synthetic
                    // turn with empty user text.
                    let index = self.next_index;
                    self.next_index += 1;
                    self.pending_user = Some((
                        index,
                        record.timestamp.unwrap_or_else(Utc::now),
                        String::new(),
                        record.agent_id.clone(),
                        spawn_depth,
                    ));
                }
                for block in record.content {
                    if let Some(cb) = block.into_content_block() {
                        self.pending_blocks.push(cb);
                    }
                }
                if record.progress_marker == Some(ProgressMarker::Spawn) {
                    if let Some(sub_ref) = &record.sub_agent_ref {
                        let spawn_turn = self
                            .pending_user
                            .as_ref()
                            .map(|(idx, ..)| *idx)
                            .unwrap_or(self.next_index.saturating_sub(1));
                        self.sub_agent_refs.push((sub_ref.clone(), spawn_turn));
                    }
                }
            }
            None => {}
        }
    }

    fn finish(mut self) -> ParsedSession {
        self.flush_pending();
        let project_path = self.project_path.unwrap_or_default();
        let project_slug = slug_from_path(&project_path);
        ParsedSession {
            session_id: self.session_id.unwrap_or_default(),
            project_path,
            project_slug,
            turns: self.turns,
            sub_agent_refs: self.sub_agent_refs,
        }
    }
}

/// Parses a transcript already loaded into memory (used for files under
/// the streaming threshold, and directly by tests).
#[must_use]
pub fn parse_str(contents: &str) -> ParsedSession {
    let mut acc = Accumulator::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        acc.ingest_line(line);
    }
    acc.finish()
}

/// Parses a transcript file, streaming it record-by-record when its size
/// exceeds [`STREAMING_THRESHOLD_BYTES`] to bound peak memory.
///
/// # Errors
/// Returns [`Error::Io`] if the file cannot be opened or read.
pub async fn parse_file(path: &Path) -> Result<ParsedSession> {
    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > STREAMING_THRESHOLD_BYTES {
        parse_file_streaming(path).await
    } else {
        let contents = tokio::fs::read_to_string(path).await?;
        Ok(parse_str(&contents))
    }
}

async fn parse_file_streaming(path: &Path) -> Result<ParsedSession> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(Error::Io)?;
    let mut reader = BufReader::new(file).lines();
    let mut acc = Accumulator::new();
    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        acc.ingest_line(&line);
    }
    Ok(acc.finish())
}

/// Returns the turns from `index` (inclusive) onward, used by the ingest
/// orchestrator to slice unseen turns after a checkpoint.
#[must_use]
pub fn turns_from(session: &ParsedSession, from_index: usize) -> Vec<Turn> {
    session
        .turns
        .iter()
        .filter(|t| t.index >= from_index)
        .cloned()
        .collect()
}

/// Whether a discovered sub-agent file should be skipped as a dead end:
/// fewer than [`DEAD_END_LINE_THRESHOLD`] lines and no user input among
/// them.
#[must_use]
pub fn is_dead_end(line_count: usize, has_user_input: bool) -> bool {
    line_count < DEAD_END_LINE_THRESHOLD && !has_user_input
}
