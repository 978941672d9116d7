// src/llm_extract.rs
//
// LLM-first extraction: supplier name plus line items with clean
// descriptions and MPN. Falls back to zero items on any failure so the
// deterministic parsers can take over.

use crate::config::LlmSection;
use crate::llm_client::{self, chat, clip, resolve_endpoint};
use crate::models::RawLineItem;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

/// The prompt template that instructs the model to extract structured invoice data.
const SYSTEM_PROMPT: &str = r#"You are an expert invoice data extractor. Extract the supplier/vendor name and all line items from raw invoice text, and return ONLY valid JSON.

The JSON must match this schema exactly:
{
  "supplier_name": "Full Legal Company Name",
  "line_items": [
    {
      "item_description": "Clean product description only",
      "manufacturer_part_number": "SKU or null",
      "quantity": 1,
      "original_uom": "EA",
      "unit_price": 1.99,
      "extended_price": 1.99
    }
  ]
}

RULES:
1. supplier_name: The FULL legal/business name of the company that issued the invoice (e.g. "MSC Industrial Supply Co.", "ULINE", "Magid Glove and Safety Manufacturing", "Fastenal Company"). NOT addresses, NOT "Remit to", NOT P.O. Box. The vendor/supplier company name.

2. For each line item, extract:
   - item_description: CLEAN product description ONLY. Human-readable product name. Remove quantities, prices, UOM, raw table junk. Examples: "LARGE 1/PR MEN'S CTN/PLY STRNGKN GLV", "SAFETY GLASS WIPES", "TOILET BOWL CLEANER 32 OZ BOTTLE". NO "200 200 EA 0.37 74.00" - that is raw data. Extract the actual product name.
   - manufacturer_part_number: The SKU, part number, catalog number, item number, or style code from the invoice (e.g. "35-C410/L", "S-19310", "BC924MSH-BK"). Null if not present.
   - quantity: numeric qty ordered/shipped
   - original_uom: EA, BX, CS, PR, DZ, DP, CT, RL, etc. as shown. Null if unclear.
   - unit_price: price per unit
   - extended_price: line total

3. Do NOT invent MPN or descriptions. Extract only what is on the invoice.
4. Skip header rows, totals, subtotals, tax lines. Only real product line items with prices.
5. Handle OCR noise: ignore repeated characters (e.g. MMMaaagggiiiddd = Magid).
6. Return ONLY the JSON object, no markdown fences, no commentary."#;

/// Cap on invoice text sent to the model, to stay within context limits.
const MAX_INPUT_CHARS: usize = 12_000;

/// Confidence attached to every LLM-extracted line.
const LLM_LINE_CONFIDENCE: f64 = 0.85;

const MAX_RESPONSE_TOKENS: u32 = 8_000;

/// Extract supplier name and all line items from raw invoice text.
/// Any failure (endpoint, transport, malformed JSON) degrades to the
/// supplier hint and zero items — extraction is never fatal.
pub async fn extract_all(
    client: &Client,
    llm: &LlmSection,
    text: &str,
    hint_supplier: Option<&str>,
) -> (String, Vec<RawLineItem>) {
    match try_extract_all(client, llm, text, hint_supplier).await {
        Ok((supplier, items)) => {
            info!(supplier = %supplier, line_items = items.len(), "LLM extraction result");
            (supplier, items)
        }
        Err(e) => {
            warn!(error = %e, "LLM extraction failed");
            (fallback_supplier(hint_supplier), Vec::new())
        }
    }
}

async fn try_extract_all(
    client: &Client,
    llm: &LlmSection,
    text: &str,
    hint_supplier: Option<&str>,
) -> Result<(String, Vec<RawLineItem>), Box<dyn std::error::Error>> {
    let endpoint = resolve_endpoint(llm)?;
    let text = clip(text, MAX_INPUT_CHARS);

    let user = match hint_supplier {
        Some(hint) => format!(
            "Extract supplier and line items from this invoice.\nVendor hint from filename/headers: {hint}\n\nRAW INVOICE TEXT:\n{text}"
        ),
        None => {
            format!("Extract supplier and line items from this invoice.\n\nRAW INVOICE TEXT:\n{text}")
        }
    };

    let content = chat(client, &endpoint, SYSTEM_PROMPT, &user, MAX_RESPONSE_TOKENS).await?;
    parse_response(&content, hint_supplier)
}

/// Parse the model's JSON reply into a supplier name and line items.
/// Individual malformed line objects are skipped, not fatal.
fn parse_response(
    content: &str,
    hint_supplier: Option<&str>,
) -> Result<(String, Vec<RawLineItem>), Box<dyn std::error::Error>> {
    let json_str = llm_client::extract_json_object(llm_client::strip_markdown_fences(content))?;
    let data: Value = serde_json::from_str(json_str)?;

    let supplier = clean_supplier(data.get("supplier_name").and_then(Value::as_str), hint_supplier);
    let items = data
        .get("line_items")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(line_from_value).collect())
        .unwrap_or_default();

    Ok((supplier, items))
}

fn fallback_supplier(hint: Option<&str>) -> String {
    hint.map(str::to_string)
        .unwrap_or_else(|| "Unknown Supplier".to_string())
}

fn clean_supplier(name: Option<&str>, hint: Option<&str>) -> String {
    match name.map(str::trim) {
        Some(s)
            if !s.is_empty() && !matches!(s.to_lowercase().as_str(), "unknown" | "null" | "n/a") =>
        {
            s.to_string()
        }
        _ => fallback_supplier(hint),
    }
}

/// Convert one line-item object from the model into a RawLineItem.
/// Returns None for junk lines: no description, no usable price, or
/// non-numeric fields where numbers are required.
fn line_from_value(o: &Value) -> Option<RawLineItem> {
    let description = [o.get("item_description"), o.get("description")]
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())?
        .to_string();

    let quantity = match o.get("quantity") {
        None => 1.0,
        Some(v) => value_as_f64(v)?,
    };

    let mut unit_price = optional_price(o, "unit_price")?;
    let mut extension = optional_price(o, "extended_price")?;
    if extension.is_none() && unit_price.is_some() && quantity != 0.0 {
        extension = unit_price.map(|u| u * quantity);
    } else if unit_price.is_none() && extension.is_some() && quantity != 0.0 {
        unit_price = extension.map(|e| e / quantity);
    }
    // A line with no price information at all is table junk, not a line item.
    let unit_price = unit_price?;

    let original_uom = o
        .get("original_uom")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Some(RawLineItem {
        description,
        manufacturer_part_number: mpn_from_value(o),
        original_uom,
        quantity,
        unit_price,
        extension_price: extension,
        line_confidence: LLM_LINE_CONFIDENCE,
    })
}

/// MPN under either key the model tends to use; "null"/"n/a" strings are
/// treated as absent. Never synthesized.
fn mpn_from_value(o: &Value) -> Option<String> {
    let v = [
        o.get("manufacturer_part_number"),
        o.get("manufacturer_part"),
    ]
    .into_iter()
    .flatten()
    .find(|v| !v.is_null())?;

    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    match s.to_lowercase().as_str() {
        "" | "null" | "n/a" => None,
        _ => Some(s),
    }
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A missing or JSON-null price is fine (Some(None)); a present but
/// non-numeric one poisons the line (None).
fn optional_price(o: &Value, key: &str) -> Option<Option<f64>> {
    match o.get(key) {
        None | Some(Value::Null) => Some(None),
        Some(v) => value_as_f64(v).map(Some),
    }
}
