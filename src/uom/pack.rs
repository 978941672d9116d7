// src/uom/pack.rs

//! Deterministic pack-expression parser.
//!
//! Recognizes the pack notations suppliers print in description text or in
//! the UOM field itself and turns them into a candidate expressed in base
//! units (eaches). Notation families, most to least explicit:
//!
//! - count-per-container: "100PR/DP", "4DZ/CS", "100EA/CS" — the leading
//!   count unit folds into the quantity (100PR = 200 eaches)
//! - quantity-per-container: "25/CS", "100/DISP", and the glove idiom "1/PR"
//! - container-quantity codes: "PK10", "CS/1000", "BX 100"
//! - bare counts: "1000 EA", "100 PR" — weakest evidence
//!
//! Matching is case-insensitive. Quantities are strictly positive integers;
//! a digit run preceded by '.' or ',' is the fractional part of a number
//! ("$2.50/CS") and is rejected so per-container prices never masquerade as
//! pack quantities.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::units::{self, UnitClass};
use super::{CandidateSource, PackCandidate, UnitOfCount};

/// Deduction for quantities found through the bare-count fallback patterns,
/// and for container-quantity codes with no UOM field to corroborate them.
const FALLBACK_PENALTY: f64 = 0.2;
/// Deduction when the UOM field names a countable unit other than the
/// container the notation matched.
const CONFLICT_PENALTY: f64 = 0.3;

// === Notation patterns (compiled once, alternations from the unit table) ===

// "100PR/DP", "4 DZ / CS" — leading count unit, container after the slash
static COUNT_PER_CONTAINER: LazyLock<Regex> = LazyLock::new(|| {
    let count = alternation(&[units::FIXED_COUNT_TOKENS, &["EA"]]);
    let container = alternation(&[units::CONTAINERS, units::COUNTS]);
    Regex::new(&format!(r"(?i)\b(\d+)\s*({count})\s*/\s*({container})\b")).unwrap()
});

// "25/CS", "100/DISP", "1/PR" — plain quantity over a container or count unit
static QTY_PER_CONTAINER: LazyLock<Regex> = LazyLock::new(|| {
    let denom = alternation(&[
        units::CONTAINERS,
        units::COUNTS,
        units::FIXED_COUNT_TOKENS,
        &["EA"],
    ]);
    Regex::new(&format!(r"(?i)\b(\d+)\s*/\s*({denom})\b")).unwrap()
});

// "CS/1000", "BOX/100" — container code before the quantity, slash form
static CONTAINER_SLASH_QTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(CASE|BOX|CTN|CS|BX|CT|DP|BG|RL)\s*/\s*(\d+)\b").unwrap()
});

// "PK10", "PK 10", "CS 1000" — tight container-quantity codes. The
// alternation stays narrow on purpose: long spellings collide with free text
// ("PO BOX 22" must not become a pack of 22).
static CONTAINER_QTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(CASE|PACK|PAC|PK|BX|CS|CTN|CT)\s*(\d+)\b").unwrap()
});

// "1000 EA", "500 EACH" — bare each-count
static BARE_EA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)\s*(EACH|EA)\b").unwrap());

// "100 PR LARGE", "12 PAIR" — bare pair-count; the trailing context keeps
// part-number fragments like "100 PRX" out
static BARE_PR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)\s*(PAIR|PR)(?:\s+[A-Za-z]|\s*$|\s*/)").unwrap());

/// Join token groups into a regex alternation, longest spelling first so the
/// trailing word boundary never truncates "CTN" to "CT".
fn alternation(groups: &[&[&str]]) -> String {
    let mut tokens: Vec<&str> = groups.iter().flat_map(|g| g.iter().copied()).collect();
    tokens.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    tokens.dedup();
    tokens.join("|")
}

/// A parsed notation occurrence, before confidence scoring.
struct NotationMatch {
    start: usize,
    quantity: u32,
    unit_of_count: UnitOfCount,
    container: String,
    matched: String,
}

/// Parse pack evidence for one line.
///
/// A notation inside the UOM field itself is authoritative; notations found
/// in the description are scored against the UOM field. Returns `None` when
/// no notation family matches — base-unit and fixed-multiplier UOM tokens
/// are not this parser's business.
pub fn parse(description: &str, original_uom: Option<&str>) -> Option<PackCandidate> {
    let uom = original_uom.map(str::trim).filter(|s| !s.is_empty());

    if let Some(u) = uom {
        if let Some(m) = scan_explicit(u).or_else(|| scan_code(u)) {
            return Some(candidate(m, 1.0));
        }
    }

    if let Some(m) = scan_explicit(description) {
        let mut conf = 1.0;
        if conflicts(uom, &m.container) {
            conf -= CONFLICT_PENALTY;
        }
        return Some(candidate(m, conf));
    }

    if let Some(m) = scan_code(description) {
        // A container-quantity code is explicit only when a UOM field exists
        // to anchor it; "PK10" alone in free text could be a style number.
        let conf = match uom {
            None => 1.0 - FALLBACK_PENALTY - CONFLICT_PENALTY,
            Some(_) if conflicts(uom, &m.container) => 1.0 - CONFLICT_PENALTY,
            Some(_) => 1.0,
        };
        return Some(candidate(m, conf));
    }

    if let Some(m) = scan_bare(description) {
        // Bare counts name no container, so the UOM field cannot conflict.
        return Some(candidate(m, 1.0 - FALLBACK_PENALTY));
    }

    None
}

/// Earliest valid match among the two slash families; the folded count form
/// wins ties since it subsumes the plain form.
fn scan_explicit(text: &str) -> Option<NotationMatch> {
    let folded = first_valid(text, &COUNT_PER_CONTAINER, count_per_container_match);
    let plain = first_valid(text, &QTY_PER_CONTAINER, qty_per_container_match);
    match (folded, plain) {
        (Some(f), Some(p)) if p.start < f.start => Some(p),
        (Some(f), _) => Some(f),
        (None, p) => p,
    }
}

/// Earliest valid container-quantity code; the slash form wins ties.
fn scan_code(text: &str) -> Option<NotationMatch> {
    let slash = first_valid(text, &CONTAINER_SLASH_QTY, container_qty_match);
    let tight = first_valid(text, &CONTAINER_QTY, container_qty_match);
    match (slash, tight) {
        (Some(s), Some(t)) if t.start < s.start => Some(t),
        (Some(s), _) => Some(s),
        (None, t) => t,
    }
}

/// Earliest bare count, folding pairs to eaches.
fn scan_bare(text: &str) -> Option<NotationMatch> {
    let ea = first_valid(text, &BARE_EA, bare_count_match);
    let pr = first_valid(text, &BARE_PR, bare_count_match);
    match (ea, pr) {
        (Some(e), Some(p)) if p.start < e.start => Some(p),
        (Some(e), _) => Some(e),
        (None, p) => p,
    }
}

/// First occurrence that survives the decimal guard and parses cleanly.
fn first_valid(
    text: &str,
    pattern: &Regex,
    parse_capture: fn(&Captures, &str) -> Option<NotationMatch>,
) -> Option<NotationMatch> {
    for cap in pattern.captures_iter(text) {
        let Some(whole) = cap.get(0) else { continue };
        if preceded_by_decimal(text, whole.start()) {
            continue;
        }
        if let Some(m) = parse_capture(&cap, text) {
            return Some(m);
        }
    }
    None
}

fn count_per_container_match(cap: &Captures, _text: &str) -> Option<NotationMatch> {
    let whole = cap.get(0)?;
    let count = parse_quantity(cap.get(1)?.as_str())?;
    let count_unit = cap.get(2)?.as_str();
    let container = cap.get(3)?.as_str();
    let factor = units::count_unit_factor(count_unit)?;
    Some(NotationMatch {
        start: whole.start(),
        quantity: count.checked_mul(factor)?,
        unit_of_count: UnitOfCount::for_token(count_unit),
        container: container.to_uppercase(),
        matched: whole.as_str().trim().to_string(),
    })
}

fn qty_per_container_match(cap: &Captures, _text: &str) -> Option<NotationMatch> {
    let whole = cap.get(0)?;
    let quantity = parse_quantity(cap.get(1)?.as_str())?;
    let denom = cap.get(2)?.as_str();
    // "1/PR" on glove invoices means one pair, i.e. two eaches.
    if quantity == 1 && units::canonical_key(denom).as_deref() == Some("PR") {
        return Some(NotationMatch {
            start: whole.start(),
            quantity: 2,
            unit_of_count: UnitOfCount::Pair,
            container: "PR".to_string(),
            matched: whole.as_str().trim().to_string(),
        });
    }
    Some(NotationMatch {
        start: whole.start(),
        quantity,
        unit_of_count: UnitOfCount::Each,
        container: denom.to_uppercase(),
        matched: whole.as_str().trim().to_string(),
    })
}

fn container_qty_match(cap: &Captures, _text: &str) -> Option<NotationMatch> {
    let whole = cap.get(0)?;
    let container = cap.get(1)?.as_str();
    let quantity = parse_quantity(cap.get(2)?.as_str())?;
    Some(NotationMatch {
        start: whole.start(),
        quantity,
        unit_of_count: UnitOfCount::Each,
        container: container.to_uppercase(),
        matched: whole.as_str().trim().to_string(),
    })
}

fn bare_count_match(cap: &Captures, text: &str) -> Option<NotationMatch> {
    let whole = cap.get(0)?;
    let count = parse_quantity(cap.get(1)?.as_str())?;
    let unit = cap.get(2)?;
    let factor = units::count_unit_factor(unit.as_str())?;
    Some(NotationMatch {
        start: whole.start(),
        quantity: count.checked_mul(factor)?,
        unit_of_count: UnitOfCount::for_token(unit.as_str()),
        container: units::canonical_key(unit.as_str())?,
        // The pattern may consume a following word character; cite only the
        // count and its unit.
        matched: text[whole.start()..unit.end()].trim().to_string(),
    })
}

/// Pack quantities are strictly positive. Oversized digit runs fail the u32
/// parse and reject the occurrence rather than wrapping.
fn parse_quantity(digits: &str) -> Option<u32> {
    let n: u32 = digits.parse().ok()?;
    (n > 0).then_some(n)
}

/// Word boundaries cannot see across '.' or ',' — without this guard the
/// "50" in "$2.50/CS" would match as a quantity.
fn preceded_by_decimal(text: &str, start: usize) -> bool {
    start > 0 && matches!(text.as_bytes()[start - 1], b'.' | b',')
}

/// A conflict exists when the UOM field names a countable unit that is not
/// the matched container. Base-unit UOMs tolerate pack notes (EA pricing
/// refined by "1/PR"), and measurable UOMs are the escalation policy's
/// business, not a parser penalty.
fn conflicts(original_uom: Option<&str>, container: &str) -> bool {
    let Some(raw) = original_uom else {
        return false;
    };
    let Some(uom_key) = units::canonical_key(raw) else {
        return false;
    };
    if Some(uom_key.as_str()) == units::canonical_key(container).as_deref() {
        return false;
    }
    units::classify(raw) == UnitClass::CountableContainer
}

fn candidate(m: NotationMatch, confidence: f64) -> PackCandidate {
    PackCandidate {
        quantity_per_pack: m.quantity,
        unit_of_count: m.unit_of_count,
        container_unit: m.container,
        source: CandidateSource::Deterministic,
        confidence: confidence.max(0.0),
        matched_text: Some(m.matched),
        escalation_hint: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_conf(candidate: &PackCandidate, expected: f64) {
        assert!(
            (candidate.confidence - expected).abs() < 1e-9,
            "confidence {} != {}",
            candidate.confidence,
            expected
        );
    }

    #[test]
    fn quantity_per_container_is_fully_confident() {
        let c = parse("SAFETY GLASSES CLEAR LENS, 25/CS", Some("CS")).unwrap();
        assert_eq!(c.quantity_per_pack, 25);
        assert_eq!(c.container_unit, "CS");
        assert_eq!(c.unit_of_count, UnitOfCount::Each);
        assert_eq!(c.matched_text.as_deref(), Some("25/CS"));
        assert_conf(&c, 1.0);
    }

    #[test]
    fn one_per_pair_means_two_eaches() {
        let c = parse("LARGE 1/PR MENS LEATHER GLOVES", Some("EA")).unwrap();
        assert_eq!(c.quantity_per_pack, 2);
        assert_eq!(c.unit_of_count, UnitOfCount::Pair);
        assert_eq!(c.matched_text.as_deref(), Some("1/PR"));
        assert_conf(&c, 1.0);
    }

    #[test]
    fn leading_count_unit_folds_into_quantity() {
        let c = parse("COTTON GLOVE LINERS 100PR/DP", Some("DP")).unwrap();
        assert_eq!(c.quantity_per_pack, 200);
        assert_eq!(c.unit_of_count, UnitOfCount::Pair);
        assert_eq!(c.container_unit, "DP");
        assert_eq!(c.matched_text.as_deref(), Some("100PR/DP"));
        assert_conf(&c, 1.0);

        let c = parse("EAR PLUGS 100EA/CS", Some("CS")).unwrap();
        assert_eq!(c.quantity_per_pack, 100);
        assert_eq!(c.unit_of_count, UnitOfCount::Each);

        let c = parse("PENCILS 4 DZ / BX", Some("BX")).unwrap();
        assert_eq!(c.quantity_per_pack, 48);
        assert_eq!(c.unit_of_count, UnitOfCount::Dozen);
    }

    #[test]
    fn catalog_numbers_do_not_match() {
        assert!(parse("MODEL 2510 WIDGET", Some("EA")).is_none());
        assert!(parse("PART NO 5530-22", Some("EA")).is_none());
    }

    #[test]
    fn decimal_fragments_are_not_quantities() {
        assert!(parse("WIPES $2.50/CS LIST PRICE", Some("CS")).is_none());
        // A later clean occurrence still wins.
        let c = parse("WIPES $2.50/CS NOW 40/CS", Some("CS")).unwrap();
        assert_eq!(c.quantity_per_pack, 40);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        assert!(parse("BAD LABEL 0/CS", Some("CS")).is_none());
    }

    #[test]
    fn container_code_without_uom_takes_both_penalties() {
        let c = parse("Gloves PK10", None).unwrap();
        assert_eq!(c.quantity_per_pack, 10);
        assert_eq!(c.container_unit, "PK");
        assert_conf(&c, 0.5);
    }

    #[test]
    fn container_code_with_corroborating_uom_is_confident() {
        let c = parse("Gloves PK10", Some("PK")).unwrap();
        assert_conf(&c, 1.0);

        let c = parse("TISSUE CS/1000", Some("CASE")).unwrap();
        assert_eq!(c.quantity_per_pack, 1000);
        assert_conf(&c, 1.0);
    }

    #[test]
    fn conflicting_uom_is_penalized() {
        let c = parse("Gloves PK10", Some("CS")).unwrap();
        assert_conf(&c, 0.7);

        let c = parse("TAPE ROLLS 36/CS", Some("BX")).unwrap();
        assert_eq!(c.quantity_per_pack, 36);
        assert_conf(&c, 0.7);
    }

    #[test]
    fn base_unit_uom_tolerates_pack_notes() {
        let c = parse("TAPE ROLLS 36/CS", Some("EA")).unwrap();
        assert_eq!(c.quantity_per_pack, 36);
        assert_conf(&c, 1.0);
    }

    #[test]
    fn notation_inside_uom_field_is_authoritative() {
        let c = parse("NITRILE GLOVES LARGE", Some("25/CS")).unwrap();
        assert_eq!(c.quantity_per_pack, 25);
        assert_eq!(c.container_unit, "CS");
        assert_conf(&c, 1.0);
    }

    #[test]
    fn bare_counts_take_the_fallback_penalty() {
        let c = parse("PLASTIC SPOONS 1000 EA", Some("CS")).unwrap();
        assert_eq!(c.quantity_per_pack, 1000);
        assert_eq!(c.container_unit, "EA");
        assert_conf(&c, 0.8);

        let c = parse("GLOVES 144 PR LARGE", None).unwrap();
        assert_eq!(c.quantity_per_pack, 288);
        assert_eq!(c.unit_of_count, UnitOfCount::Pair);
        assert_eq!(c.matched_text.as_deref(), Some("144 PR"));
        assert_conf(&c, 0.8);
    }

    #[test]
    fn earliest_explicit_notation_wins() {
        let c = parse("25/CS REPACKED FROM 100PR/DP", Some("CS")).unwrap();
        assert_eq!(c.quantity_per_pack, 25);

        let c = parse("PACKED 100PR/DP, FORMERLY 25/CS", Some("DP")).unwrap();
        assert_eq!(c.quantity_per_pack, 200);
    }

    #[test]
    fn overflowing_quantities_are_rejected() {
        assert!(parse("GLOVES 4000000000PR/DP", Some("DP")).is_none());
        assert!(parse("WIDGETS 99999999999/CS", Some("CS")).is_none());
    }

    #[test]
    fn lowercase_notations_match() {
        let c = parse("gloves pk10", Some("pk")).unwrap();
        assert_eq!(c.quantity_per_pack, 10);
        assert_eq!(c.container_unit, "PK");
        assert_conf(&c, 1.0);
    }
}
