// src/supplier.rs

//! Supplier detection from invoice text.
//!
//! Deterministic signature matching against known industrial suppliers, with
//! a header-scan fallback for everyone else. The detected name is carried as
//! a hint into LLM extraction and onto the final document; nothing downstream
//! branches on it.

use std::sync::LazyLock;

use regex::Regex;

/// Known supplier signatures: pattern -> normalized display name.
static SIGNATURES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)magid\s*glove", "Magid Glove and Safety Manufacturing"),
        (r"(?i)magidglove\.com", "Magid Glove and Safety Manufacturing"),
        (r"(?i)uline\.com", "ULINE"),
        (r"(?i)\buline\b", "ULINE"),
        (r"(?i)fastenal\s+company", "Fastenal"),
        (r"(?i)fastenal\.com", "Fastenal"),
        (r"(?i)grainger", "Grainger"),
        (r"(?i)mcmaster", "McMaster-Carr"),
        (r"(?i)amazon\s*business", "Amazon Business"),
        (r"(?i)staples", "Staples"),
        (r"(?i)w\.?w\.?grainger", "Grainger"),
        (r"(?i)global\s*industrial", "Global Industrial"),
        (r"(?i)mscdirect", "MSC Industrial"),
        (r"(?i)m\.?s\.?c\.?\s*direct", "MSC Industrial"),
    ]
    .into_iter()
    .filter_map(|(p, name)| Regex::new(p).ok().map(|re| (re, name)))
    .collect()
});

// Mixed-case company header like "Apex Tool Ltd."; all-caps banners are left
// to the signature table.
static COMPANY_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][a-z]+(\s+[A-Za-z][a-z]+)*\s+(Company|Inc|LLC|Corp|Ltd)\.?$").unwrap()
});

static REMIT_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\|\-\t:]+").unwrap());

/// Detect the supplier for an invoice. Falls back to "Unknown Supplier";
/// never errors, since the name is only a hint.
pub fn detect_supplier(text: &str) -> String {
    let ocr = ocr_normalize(text).to_lowercase();

    for (pattern, name) in SIGNATURES.iter() {
        if pattern.is_match(text) || pattern.is_match(&ocr) {
            return (*name).to_string();
        }
    }

    // Header scan: the supplier usually names itself near the top, either as
    // a company line or on the remit-to line.
    for line in text.lines().take(30) {
        let line = line.trim();
        let line_ocr = ocr_normalize(line);
        if COMPANY_HEADER.is_match(&line_ocr) {
            return normalize_name(&line_ocr);
        }
        if line.contains("Remit") && !line.chars().take(20).collect::<String>().contains("P.O.") {
            for part in REMIT_SPLIT.split(line) {
                let p = part.trim();
                if p.len() > 5
                    && p.chars().next().is_some_and(|c| c.is_uppercase())
                    && !p.contains("Remit")
                    && !p.contains("P.O.")
                    && !p.contains("BOX")
                {
                    return normalize_name(p);
                }
            }
        }
    }

    "Unknown Supplier".to_string()
}

/// Collapse runs of three or more identical characters, which show up when
/// OCR stutters ("MMMaaagggiiiddd" -> "Magid").
fn ocr_normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let mut run = 1;
        while chars.peek() == Some(&c) {
            chars.next();
            run += 1;
        }
        if run >= 3 {
            out.push(c);
        } else {
            for _ in 0..run {
                out.push(c);
            }
        }
    }
    out
}

/// Collapse whitespace and title-case each word.
fn normalize_name(raw: &str) -> String {
    let words: Vec<String> = raw
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        "Unknown Supplier".to_string()
    } else {
        words.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_table_wins_over_header_lines() {
        assert_eq!(
            detect_supplier("Order online at uline.com\nShipping Supplies"),
            "ULINE"
        );
        assert_eq!(detect_supplier("W.W.GRAINGER INC\nCHICAGO IL"), "Grainger");
        assert_eq!(
            detect_supplier("MSC DIRECT\nBuild Something Great"),
            "MSC Industrial"
        );
    }

    #[test]
    fn ocr_stutter_is_collapsed_before_matching() {
        let text = "MMMaaagggiiiddd GGGlllooovvveee aaannnddd SSSaaafffeeetttyyy";
        assert_eq!(detect_supplier(text), "Magid Glove and Safety Manufacturing");
    }

    #[test]
    fn company_header_line_is_title_cased() {
        assert_eq!(detect_supplier("Apex tool Ltd\nInvoice 4417"), "Apex Tool Ltd");
    }

    #[test]
    fn remit_line_yields_the_payee() {
        let text = "Invoice\nRemit To: Apex Supplies | P.O. BOX 978";
        assert_eq!(detect_supplier(text), "Apex Supplies");
    }

    #[test]
    fn unknown_without_any_signal() {
        assert_eq!(detect_supplier("123 MAIN ST\nQTY PRICE AMOUNT"), "Unknown Supplier");
    }
}
