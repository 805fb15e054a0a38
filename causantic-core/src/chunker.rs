//! Packs consecutive turns into token-bounded chunks.

use chrono::Utc;

use crate::types::{Chunk, Turn};

/// Default maximum approximate token count per chunk.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Configuration for the chunk-packing pass.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum approximate token count a chunk may hold before a new one
    /// is started.
    pub max_tokens: u32,
    /// Whether `thinking` blocks are included in packed content and the
    /// token estimate. Included by default.
    pub include_thinking: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            include_thinking: true,
        }
    }
}

/// Approximates a token count from text length using a fixed
/// whitespace/punctuation heuristic: monotone in byte length and within
/// ±25% of a real model tokenizer for typical English/code text.
#[must_use]
pub fn approx_tokens(text: &str) -> u32 {
    let mut count: u32 = 0;
    let mut in_word = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            in_word = false;
        } else if ch.is_alphanumeric() {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            // Punctuation is its own token, matching common subword
            // tokenizer behavior closely enough to stay within the
            // contract's error bound.
            count += 1;
            in_word = false;
        }
    }
    count
}

/// Packs `turns` (already belonging to one session, in ascending index
/// order) into token-bounded chunks. Each chunk's id is derived from
/// `(session_id, sorted turn_indices)`, so re-chunking identical turns of
/// the same session always yields the same id set.
#[must_use]
pub fn pack_chunks(session_id: &str, project_slug: &str, project_path: &str, turns: &[Turn], config: &ChunkerConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current: Vec<&Turn> = Vec::new();
    let mut current_tokens: u32 = 0;

    for turn in turns {
        let turn_text = turn.full_text_with(config.include_thinking);
        let turn_tokens = approx_tokens(&turn_text);

        if !current.is_empty() && current_tokens + turn_tokens > config.max_tokens {
            chunks.push(build_chunk(session_id, project_slug, project_path, &current, config));
            current.clear();
            current_tokens = 0;
        }

        current.push(turn);
        current_tokens += turn_tokens;
    }

    if !current.is_empty() {
        chunks.push(build_chunk(session_id, project_slug, project_path, &current, config));
    }

    chunks
}

fn build_chunk(session_id: &str, project_slug: &str, project_path: &str, turns: &[&Turn], config: &ChunkerConfig) -> Chunk {
    let turn_indices: Vec<usize> = turns.iter().map(|t| t.index).collect();
    let id = Chunk::derive_id(session_id, &turn_indices);

    let mut content = String::new();
    let mut code_block_count = 0u32;
    let mut tool_use_count = 0u32;
    for (i, turn) in turns.iter().enumerate() {
        if i > 0 {
            content.push_str("\n\n");
        }
        content.push_str(&turn.full_text_with(config.include_thinking));
        code_block_count += turn.code_block_count() as u32;
        tool_use_count += turn.tool_use_count() as u32;
    }

    let start_time = turns.first().map_or_else(Utc::now, |t| t.timestamp);
    let end_time = turns.last().map_or_else(Utc::now, |t| t.timestamp);
    let agent_id = turns.first().and_then(|t| t.agent_id.clone());
    let spawn_depth = turns.first().map_or(0, |t| t.spawn_depth);

    Chunk {
        id,
        session_id: session_id.to_string(),
        project_slug: project_slug.to_string(),
        project_path: project_path.to_string(),
        turn_indices,
        start_time,
        end_time,
        approx_tokens: approx_tokens(&content),
        code_block_count,
        tool_use_count,
        agent_id,
        spawn_depth,
        vector_clock: Vec::new(),
        created_at: Utc::now(),
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentBlock;

    fn turn(index: usize, user_text: &str, assistant_text: &str) -> Turn {
        Turn {
            index,
            timestamp: Utc::now(),
            user_text: user_text.to_string(),
            assistant_blocks: vec![ContentBlock::Text {
                text: assistant_text.to_string(),
            }],
            agent_id: None,
            spawn_depth: 0,
        }
    }

    #[test]
    fn approx_tokens_is_monotone_in_length() {
        let short = approx_tokens("hello world");
        let long = approx_tokens("hello world, this is a much longer sentence indeed");
        assert!(long > short);
    }

    #[test]
    fn packs_all_turns_into_one_chunk_when_under_budget() {
        let turns = vec![turn(0, "a", "b"), turn(1, "c", "d")];
        let config = ChunkerConfig::default();
        let chunks = pack_chunks("s1", "proj", "/x/proj", &turns, &config);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].turn_indices, vec![0, 1]);
    }

    #[test]
    fn splits_across_chunks_when_over_budget() {
        let big_text = "word ".repeat(3000);
        let turns = vec![turn(0, &big_text, "reply"), turn(1, &big_text, "reply")];
        let config = ChunkerConfig {
            max_tokens: 4096,
            include_thinking: true,
        };
        let chunks = pack_chunks("s1", "proj", "/x/proj", &turns, &config);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].turn_indices, vec![0]);
        assert_eq!(chunks[1].turn_indices, vec![1]);
    }

    #[test]
    fn chunk_id_stable_across_rechunking() {
        let turns = vec![turn(0, "a", "b"), turn(1, "c", "d")];
        let config = ChunkerConfig::default();
        let first = pack_chunks("s1", "proj", "/x/proj", &turns, &config);
        let second = pack_chunks("s1", "proj", "/x/proj", &turns, &config);
        assert_eq!(first[0].id, second[0].id);
    }

    #[test]
    fn excludes_thinking_blocks_when_configured() {
        let mut t = turn(0, "user", "");
        t.assistant_blocks = vec![ContentBlock::Thinking {
            text: "secret reasoning".to_string(),
        }];
        let config = ChunkerConfig {
            max_tokens: 4096,
            include_thinking: false,
        };
        let chunks = pack_chunks("s1", "proj", "/x/proj", &[t], &config);
        assert!(!chunks[0].content.contains("secret reasoning"));
    }

    #[test]
    fn counts_code_blocks_and_tool_uses() {
        let mut t = turn(0, "user", "");
        t.assistant_blocks = vec![
            ContentBlock::Text {
                text: "```rust\nfn main() {}\n```".to_string(),
            },
            ContentBlock::ToolUse {
                name: "bash".to_string(),
                input: "{}".to_string(),
            },
        ];
        let chunks = pack_chunks("s1", "proj", "/x/proj", &[t], &ChunkerConfig::default());
        assert_eq!(chunks[0].code_block_count, 1);
        assert_eq!(chunks[0].tool_use_count, 1);
    }
}
