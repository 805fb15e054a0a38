//! Edge detection: lightweight text extractors, the closed backreference
//! lexicon, and the pass-one/pass-two edge builders.

mod builder;
mod extractors;
pub mod lexicon;

pub use builder::{
    brief_debrief_weight, build_adjacency_edges, build_brief_edge, build_cross_session_edges,
    build_debrief_edge, BRIEF_DEBRIEF_BASE_WEIGHT, BRIEF_DEBRIEF_DEPTH_DECAY, CROSS_SESSION_WEIGHT,
};
pub use extractors::{
    confidence_for_match_len, extract_declared_identifiers, extract_error_fragments,
    extract_file_paths, extract_tool_output_lines, references_identifier,
};
