// src/lookup.rs
//
// Batched agentic UOM lookup. All ambiguous lines of one invoice go out
// in a single call; answers come back pinned to line indices. The
// collaborator sits behind a trait so tests can swap in a canned one.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::LlmSection;
use crate::llm_client::{self, chat, clip, resolve_endpoint};
use crate::uom::{CandidateSource, PackCandidate, UnitOfCount, units};

const SYSTEM_PROMPT: &str = r#"You infer UOM and pack from invoice line descriptions. Output a JSON array of objects.
Each: {"canonical_uom": "EA", "detected_pack_quantity": int|null, "confidence": float, "escalation": bool}"#;

const USER_RULES: &str = r#"Return a JSON array with one object per item, in the SAME ORDER as above. Each object:
{"canonical_uom": "EA", "detected_pack_quantity": <int or null>, "confidence": <0.0-1.0>, "escalation": <bool>}

RULES:
- detected_pack_quantity: ONLY if explicitly in description (e.g. "100/DP" -> 100, "25/CS" -> 25). Null if uncertain.
- NEVER invent pack sizes. escalation: true if confidence < 0.6.
- Output ONLY the JSON array."#;

/// Cap per-line description text sent in the batch prompt.
const MAX_DESC_CHARS: usize = 400;

/// One ambiguous line submitted for lookup. `line_index` is the line's
/// position within its invoice and is what pairs the answer back.
#[derive(Debug, Clone)]
pub struct LookupRequest {
    pub line_index: usize,
    pub description: String,
    pub manufacturer_part_number: Option<String>,
    pub original_uom: Option<String>,
}

/// Collaborator verdict for one line. A `None` pack quantity means the
/// collaborator could not help either.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResponse {
    pub canonical_uom: String,
    pub detected_pack_quantity: Option<u32>,
    pub confidence: f64,
    pub escalation: bool,
}

impl LookupResponse {
    /// The verdict for a line the collaborator gave no usable answer for.
    pub fn unresolved() -> Self {
        Self {
            canonical_uom: "EA".to_string(),
            detected_pack_quantity: None,
            confidence: 0.3,
            escalation: true,
        }
    }

    /// Fold the verdict back into an engine candidate. No pack quantity
    /// means no candidate; the collaborator's confidence is carried as-is,
    /// its escalation wish as the hint. A measurable canonical_uom is
    /// off-contract and yields no candidate rather than a fake countable one.
    pub fn to_candidate(&self, original_uom: Option<&str>) -> Option<PackCandidate> {
        if units::is_measurable(&self.canonical_uom) {
            return None;
        }
        let quantity = self.detected_pack_quantity.filter(|q| *q >= 1)?;
        Some(PackCandidate {
            quantity_per_pack: quantity,
            unit_of_count: UnitOfCount::Each,
            container_unit: original_uom.unwrap_or_default().trim().to_uppercase(),
            source: CandidateSource::AgenticLookup,
            confidence: self.confidence.clamp(0.0, 1.0),
            matched_text: None,
            escalation_hint: self.escalation,
        })
    }
}

/// Batched ambiguous-UOM resolution, one call per invoice. The returned map
/// is keyed by line index; a missing index means no answer for that line.
/// Implementations must not fail the batch — transport or parse trouble
/// degrades to unresolved verdicts.
#[async_trait]
pub trait UomLookup: Send + Sync {
    async fn resolve_batch(
        &self,
        supplier_name: &str,
        requests: &[LookupRequest],
    ) -> HashMap<usize, LookupResponse>;
}

/// Production lookup backed by the configured chat endpoint.
pub struct LlmUomLookup {
    client: Client,
    llm: LlmSection,
}

impl LlmUomLookup {
    pub fn new(client: Client, llm: LlmSection) -> Self {
        Self { client, llm }
    }

    async fn try_resolve_batch(
        &self,
        supplier_name: &str,
        requests: &[LookupRequest],
    ) -> Result<HashMap<usize, LookupResponse>, Box<dyn std::error::Error>> {
        let endpoint = resolve_endpoint(&self.llm)?;

        let mut lines_text = String::new();
        for req in requests {
            let desc = clip(&req.description, MAX_DESC_CHARS);
            lines_text.push_str(&format!("{}: {desc}", req.line_index));
            if let Some(mpn) = &req.manufacturer_part_number {
                lines_text.push_str(&format!(" SKU: {mpn}"));
            }
            lines_text.push('\n');
        }

        let supplier = if supplier_name.trim().is_empty() {
            "Unknown"
        } else {
            supplier_name
        };
        let user = format!(
            "Infer UOM and pack quantity for each line item. Supplier: {supplier}\n\nItems (format \"idx: description\"):\n{lines_text}\n{USER_RULES}"
        );

        // Short replies: one small object per line.
        let max_tokens = (requests.len() as u32)
            .saturating_mul(80)
            .saturating_add(200)
            .min(2_000);

        let content = chat(&self.client, &endpoint, SYSTEM_PROMPT, &user, max_tokens).await?;
        parse_batch_response(&content, requests)
    }
}

#[async_trait]
impl UomLookup for LlmUomLookup {
    async fn resolve_batch(
        &self,
        supplier_name: &str,
        requests: &[LookupRequest],
    ) -> HashMap<usize, LookupResponse> {
        if requests.is_empty() {
            return HashMap::new();
        }
        match self.try_resolve_batch(supplier_name, requests).await {
            Ok(map) => {
                info!(lines = requests.len(), resolved = map.len(), "UOM lookup batch done");
                map
            }
            Err(e) => {
                warn!(error = %e, lines = requests.len(), "UOM lookup batch failed");
                requests
                    .iter()
                    .map(|r| (r.line_index, LookupResponse::unresolved()))
                    .collect()
            }
        }
    }
}

/// Map the reply array back onto the request batch. Pairing is positional
/// (the prompt demands SAME ORDER); every requested index always gets an
/// entry, with short arrays and malformed objects padded as unresolved.
fn parse_batch_response(
    content: &str,
    requests: &[LookupRequest],
) -> Result<HashMap<usize, LookupResponse>, Box<dyn std::error::Error>> {
    let json_str = llm_client::extract_json_array(llm_client::strip_markdown_fences(content))?;
    let values: Vec<Value> = serde_json::from_str(json_str)?;

    let mut result = HashMap::with_capacity(requests.len());
    for (i, req) in requests.iter().enumerate() {
        let response = values
            .get(i)
            .map(response_from_value)
            .unwrap_or_else(LookupResponse::unresolved);
        result.insert(req.line_index, response);
    }
    Ok(result)
}

fn response_from_value(o: &Value) -> LookupResponse {
    let Some(o) = o.as_object() else {
        return LookupResponse::unresolved();
    };
    let canonical_uom = o
        .get("canonical_uom")
        .and_then(Value::as_str)
        .unwrap_or("EA")
        .trim()
        .to_uppercase();
    let confidence = match o.get("confidence") {
        None => 0.5,
        Some(v) => match value_as_f64(v) {
            Some(c) => c,
            None => return LookupResponse::unresolved(),
        },
    };
    LookupResponse {
        canonical_uom,
        detected_pack_quantity: o.get("detected_pack_quantity").and_then(pack_quantity),
        confidence,
        escalation: o.get("escalation").and_then(Value::as_bool).unwrap_or(true),
    }
}

/// Integer pack quantity from whatever numeric shape the model used;
/// fractional values truncate, anything below 1 is no quantity.
fn pack_quantity(v: &Value) -> Option<u32> {
    let q = value_as_f64(v)?.trunc();
    if (1.0..=u32::MAX as f64).contains(&q) {
        Some(q as u32)
    } else {
        None
    }
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(line_index: usize, description: &str) -> LookupRequest {
        LookupRequest {
            line_index,
            description: description.to_string(),
            manufacturer_part_number: None,
            original_uom: Some("CS".to_string()),
        }
    }

    #[test]
    fn replies_pair_back_by_line_index_not_position() {
        let requests = vec![req(2, "Gloves PK10"), req(7, "COPY PAPER LETTER")];
        let content = r#"[
            {"canonical_uom": "EA", "detected_pack_quantity": 10, "confidence": 0.9, "escalation": false},
            {"canonical_uom": "EA", "detected_pack_quantity": null, "confidence": 0.3, "escalation": true}
        ]"#;
        let map = parse_batch_response(content, &requests).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&2].detected_pack_quantity, Some(10));
        assert!(!map[&2].escalation);
        assert_eq!(map[&7].detected_pack_quantity, None);
        assert!(map[&7].escalation);
    }

    #[test]
    fn short_reply_pads_the_tail_as_unresolved() {
        let requests = vec![req(0, "a"), req(1, "b"), req(2, "c")];
        let content =
            r#"[{"canonical_uom": "EA", "detected_pack_quantity": 6, "confidence": 0.8, "escalation": false}]"#;
        let map = parse_batch_response(content, &requests).unwrap();
        assert_eq!(map[&0].detected_pack_quantity, Some(6));
        assert_eq!(map[&1], LookupResponse::unresolved());
        assert_eq!(map[&2], LookupResponse::unresolved());
    }

    #[test]
    fn fenced_reply_with_preamble_still_parses() {
        let requests = vec![req(0, "a")];
        let content = "Here is the array:\n```json\n[{\"detected_pack_quantity\": 25, \"confidence\": 0.95, \"escalation\": false}]\n```";
        let map = parse_batch_response(content, &requests).unwrap();
        assert_eq!(map[&0].detected_pack_quantity, Some(25));
        assert_eq!(map[&0].canonical_uom, "EA");
    }

    #[test]
    fn malformed_reply_is_an_error_for_the_caller_to_degrade() {
        let requests = vec![req(0, "a")];
        assert!(parse_batch_response("no json at all", &requests).is_err());
        assert!(parse_batch_response("{\"not\": \"an array\"}", &requests).is_err());
    }

    #[test]
    fn pack_quantity_shapes_normalize() {
        assert_eq!(pack_quantity(&serde_json::json!(12.7)), Some(12));
        assert_eq!(pack_quantity(&serde_json::json!("24")), Some(24));
        assert_eq!(pack_quantity(&serde_json::json!(0)), None);
        assert_eq!(pack_quantity(&serde_json::json!(-3)), None);
        assert_eq!(pack_quantity(&serde_json::json!("lots")), None);
    }

    #[test]
    fn verdict_becomes_candidate_only_with_a_quantity() {
        let with_pack = LookupResponse {
            canonical_uom: "EA".to_string(),
            detected_pack_quantity: Some(10),
            confidence: 0.9,
            escalation: true,
        };
        let candidate = with_pack.to_candidate(Some("pk")).unwrap();
        assert_eq!(candidate.quantity_per_pack, 10);
        assert_eq!(candidate.container_unit, "PK");
        assert_eq!(candidate.source, CandidateSource::AgenticLookup);
        assert!(candidate.escalation_hint);
        assert_eq!(candidate.matched_text, None);

        assert_eq!(LookupResponse::unresolved().to_candidate(Some("CS")), None);
    }

    #[test]
    fn measurable_reply_uom_yields_no_candidate() {
        let verdict = LookupResponse {
            canonical_uom: "LB".to_string(),
            detected_pack_quantity: Some(5),
            confidence: 0.9,
            escalation: false,
        };
        assert_eq!(verdict.to_candidate(Some("LB")), None);
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let verdict = LookupResponse {
            canonical_uom: "EA".to_string(),
            detected_pack_quantity: Some(2),
            confidence: 1.4,
            escalation: false,
        };
        assert_eq!(verdict.to_candidate(None).unwrap().confidence, 1.0);
    }
}
