use crate::models::RawLineItem;
use regex::Regex;

/// Extraction confidence assigned to every table-parsed line.
const LINE_CONFIDENCE: f64 = 0.7;

/// Main extraction entry point — keyword filters plus decimal clustering.
/// No supplier-specific logic: any line with enough numbers to look like a
/// priced row becomes a candidate, and the downstream cross-checks sort out
/// the ones where the columns were guessed wrong.
pub fn extract(text: &str) -> Vec<RawLineItem> {
    let number_re = Regex::new(r"\d+\.?\d*").unwrap();
    let cents_re = Regex::new(r"\d+\.\d{2}").unwrap();
    let pure_number_re = Regex::new(r"^\d+\.?\d*$").unwrap();
    let column_split_re = Regex::new(r"\s{2,}|\t").unwrap();
    // Priority order, not line order: EA beats a later BX on the same line.
    let uom_tokens: Vec<(&str, Regex)> = ["EA", "BX", "CS", "CT", "PR", "DZ", "DP", "RL", "BG", "PK"]
        .into_iter()
        .map(|u| (u, Regex::new(&format!(r"(?i)\b{u}\b")).unwrap()))
        .collect();

    let skip_keywords = [
        "invoice",
        "page",
        "remit",
        "sold to",
        "ship to",
        "sub-total",
        "total",
        "amount due",
    ];

    let mut items = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.len() < 10 {
            continue;
        }
        // Header and footer rows go, unless they carry a cents amount and
        // might be a real row mentioning e.g. "total".
        let lower = line.to_lowercase();
        if skip_keywords.iter().any(|kw| lower.contains(kw)) && !cents_re.is_match(line) {
            continue;
        }

        let nums: Vec<&str> = number_re.find_iter(line).map(|m| m.as_str()).collect();
        if nums.len() < 2 {
            continue;
        }
        let decimals: Vec<f64> = nums
            .iter()
            .filter(|n| n.contains('.'))
            .filter_map(|n| n.parse::<f64>().ok())
            .collect();
        if decimals.is_empty() {
            continue;
        }

        // First cents-precision decimal in a plausible money range is taken
        // as the extension; the next distinct decimal as the unit price.
        let Some(extended) = decimals
            .iter()
            .copied()
            .find(|v| (0.01..=999_999.0).contains(v) && at_most_cents(*v))
        else {
            continue;
        };
        let unit_price = decimals
            .iter()
            .copied()
            .find(|v| *v != extended && (0.001..=99_999.0).contains(v));

        // First integer-valued number that isn't the extension.
        let quantity = nums
            .iter()
            .filter_map(|n| n.parse::<f64>().ok())
            .find(|v| v.fract() == 0.0 && (1.0..=99_999.0).contains(v) && *v != extended)
            .unwrap_or(1.0);

        let description = description_for(line, &column_split_re, &pure_number_re);
        let original_uom = uom_tokens
            .iter()
            .find(|(_, re)| re.is_match(line))
            .map(|(u, _)| (*u).to_string());

        items.push(RawLineItem {
            description,
            manufacturer_part_number: None,
            original_uom,
            quantity,
            unit_price: unit_price.unwrap_or(extended / quantity),
            extension_price: Some(extended),
            line_confidence: LINE_CONFIDENCE,
        });
    }

    items
}

/// Description = the first few non-numeric column fragments, else the start
/// of the line.
fn description_for(line: &str, column_split_re: &Regex, pure_number_re: &Regex) -> String {
    let parts: Vec<&str> = column_split_re
        .split(line)
        .filter(|p| !pure_number_re.is_match(&p.replace(',', "")) && p.len() > 2)
        .collect();
    let desc = if parts.is_empty() {
        line.chars().take(50).collect::<String>()
    } else {
        parts[..parts.len().min(3)].join(" ")
    };
    desc.chars().take(200).collect()
}

/// True when the value has at most two decimal places — money, not a weight
/// or a part number fragment.
fn at_most_cents(v: f64) -> bool {
    (v * 100.0).round() / 100.0 == v
}
