// src/models.rs

use serde::{Deserialize, Serialize};

/// A line item as extracted from invoice text, before normalization.
/// Produced once per extraction pass and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLineItem {
    pub description: String,
    #[serde(default)]
    pub manufacturer_part_number: Option<String>,
    /// UOM exactly as present on the invoice ("CS", "EA", ...), if any.
    #[serde(default)]
    pub original_uom: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
    /// Line total as printed on the invoice; used only as a cross-check.
    #[serde(default)]
    pub extension_price: Option<f64>,
    /// Extraction-path confidence (LLM 0.85, generic parser 0.7).
    #[serde(default = "default_line_confidence")]
    pub line_confidence: f64,
}

fn default_line_confidence() -> f64 {
    1.0
}

/// Final per-line record: the raw fields plus normalization results and the
/// escalation verdict. Every raw line yields exactly one of these — there is
/// no error-terminal state, uncertainty is expressed through
/// `escalation_flag` and `confidence`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedLineItem {
    pub description: String,
    pub manufacturer_part_number: Option<String>,
    pub original_uom: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
    pub extension_price: Option<f64>,
    /// "EA" when the line was accepted as convertible, otherwise null.
    pub canonical_uom: Option<String>,
    pub detected_pack_quantity: Option<u32>,
    /// Price per single base unit (EA). Null when the UOM is not convertible
    /// (e.g. LB, GAL) or no pack quantity was evidenced.
    pub price_per_base_unit: Option<f64>,
    pub confidence: f64,
    pub escalation_flag: bool,
    pub escalation_reason: Option<String>,
}

/// Result for a single processed invoice. `raw_metadata` carries provenance
/// (which extraction path produced the lines, or an error note) without the
/// engine needing to know its meaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceResult {
    pub source_file: String,
    pub supplier_name: String,
    pub line_items: Vec<NormalizedLineItem>,
    #[serde(default)]
    pub raw_metadata: std::collections::BTreeMap<String, String>,
}

impl InvoiceResult {
    /// Result for an invoice that could not be processed at all — the batch
    /// must keep going, so the failure is recorded instead of raised.
    pub fn failed(source_file: &str, error: &str) -> Self {
        let mut raw_metadata = std::collections::BTreeMap::new();
        raw_metadata.insert("error".to_string(), error.to_string());
        Self {
            source_file: source_file.to_string(),
            supplier_name: "Error".to_string(),
            line_items: Vec::new(),
            raw_metadata,
        }
    }

    /// How many lines were flagged for human review.
    pub fn escalation_count(&self) -> usize {
        self.line_items.iter().filter(|li| li.escalation_flag).count()
    }
}
