// src/heuristics/mod.rs

//! Heuristic (non-LLM) line-item extraction.
//!
//! Fallback for when no language model is configured or reachable: a
//! supplier-agnostic table parser over raw invoice text. Lines found here
//! carry a lower extraction confidence than LLM output, which flows into
//! the normalization engine's combined score.

mod generic;

use crate::models::RawLineItem;

/// Extract line-item candidates from raw invoice text.
pub fn extract_lines(text: &str) -> Vec<RawLineItem> {
    generic::extract(text)
}
