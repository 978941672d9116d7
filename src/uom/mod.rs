// src/uom/mod.rs

//! UOM normalization engine.
//!
//! Decides, for every extracted line item, whether its pricing can be
//! restated per base unit (EA) and at what confidence, or must be escalated
//! for human review. The core is pure and synchronous: no I/O, no mutable
//! state beyond the static unit table, so callers can fan lines out across
//! tasks freely. External lookup is the caller's job; this module only says
//! which lines need it and folds the answers back in.

pub mod pack;
pub mod policy;
pub mod resolve;
pub mod units;

use crate::models::{NormalizedLineItem, RawLineItem};

pub use units::UnitClass;

/// Confidence reported for measurable-unit lines. The classification itself
/// is certain; the low score reflects that no pack quantity applies.
const MEASURABLE_CONFIDENCE: f64 = 0.3;

/// How many base units one ordering unit contains, and the evidence for it.
#[derive(Debug, Clone, PartialEq)]
pub struct PackCandidate {
    /// Base units (eaches) per pack, strictly positive. Count units fold in:
    /// "100PR/DP" carries 200, not 100.
    pub quantity_per_pack: u32,
    /// What the notation counted, kept for audit: "100PR/DP" counted pairs.
    pub unit_of_count: UnitOfCount,
    /// Unit token the evidence named, as matched ("CS", "PK", ...).
    pub container_unit: String,
    pub source: CandidateSource,
    /// Certainty in the detected quantity, [0, 1].
    pub confidence: f64,
    /// Substring the evidence came from.
    pub matched_text: Option<String>,
    /// A lookup may supply a quantity and still ask for review.
    pub escalation_hint: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfCount {
    Each,
    Pair,
    Dozen,
    OtherCountable,
}

impl UnitOfCount {
    /// Count family for a unit token; containers and unknowns count eaches.
    pub(crate) fn for_token(token: &str) -> Self {
        match units::canonical_key(token).as_deref() {
            Some("PR") => Self::Pair,
            Some("DZ") => Self::Dozen,
            Some("GROSS") => Self::OtherCountable,
            _ => Self::Each,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Deterministic,
    AgenticLookup,
}

/// Tunables shared by the resolver and the escalation policy. Explicit
/// parameters rather than process constants, so they can vary per supplier.
#[derive(Debug, Clone)]
pub struct EngineParams {
    /// Combined confidence below this escalates.
    pub confidence_threshold: f64,
    /// Allowed relative gap between extension_price and unit_price x qty.
    pub price_tolerance: f64,
    /// Currency decimal places for per-base-unit prices.
    pub currency_scale: i64,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            price_tolerance: 0.01,
            currency_scale: 4,
        }
    }
}

/// Deterministic candidate for a line: textual pack notation first, then the
/// UOM token itself where it is definitional (EA counts 1, PR 2, DZ 12,
/// GROSS 144). Measurable and container UOMs have no definitional quantity.
pub fn parse_line(raw: &RawLineItem) -> Option<PackCandidate> {
    let uom = raw.original_uom.as_deref();
    if let Some(candidate) = pack::parse(&raw.description, uom) {
        return Some(candidate);
    }
    definitional_candidate(uom)
}

fn definitional_candidate(uom: Option<&str>) -> Option<PackCandidate> {
    let token = uom.map(str::trim).filter(|s| !s.is_empty())?;
    let factor = units::count_unit_factor(token)?;
    Some(PackCandidate {
        quantity_per_pack: factor,
        unit_of_count: UnitOfCount::for_token(token),
        container_unit: token.to_uppercase(),
        source: CandidateSource::Deterministic,
        // A fixed-multiplier token is strong but not airtight evidence;
        // "DZ" occasionally labels a dozen-pack sold as one unit.
        confidence: if factor == 1 { 1.0 } else { 0.95 },
        matched_text: Some(token.to_string()),
        escalation_hint: false,
    })
}

/// Whether this line belongs in the invoice's lookup batch: no candidate, or
/// one too weak to act on. Measurable lines never go — no lookup makes LB
/// convertible to EA.
pub fn needs_lookup(raw: &RawLineItem, candidate: Option<&PackCandidate>, params: &EngineParams) -> bool {
    if raw.original_uom.as_deref().is_some_and(units::is_measurable) {
        return false;
    }
    match candidate {
        None => true,
        Some(c) => c.confidence < params.confidence_threshold,
    }
}

/// Produce the line's final record from the evidence at hand. Total: every
/// raw line yields a record, with uncertainty expressed in the flag and the
/// confidence, never as an error.
pub fn finalize_line(
    raw: &RawLineItem,
    candidate: Option<PackCandidate>,
    params: &EngineParams,
) -> NormalizedLineItem {
    let uom = raw.original_uom.as_deref();
    let measurable = uom.is_some_and(units::is_measurable);
    // A pack note in the description does not make gallons countable.
    let candidate = if measurable { None } else { candidate };
    let unit_class = if measurable {
        UnitClass::MeasurablePhysical
    } else {
        effective_unit_class(uom, candidate.as_ref())
    };
    let (price_per_base_unit, safe) = resolve::resolve(raw, candidate.as_ref(), unit_class, params);
    let confidence = if measurable {
        MEASURABLE_CONFIDENCE
    } else {
        combined_confidence(raw, candidate.as_ref())
    };
    let reason = policy::decide(
        candidate.as_ref(),
        unit_class,
        safe,
        confidence,
        params.confidence_threshold,
    );
    NormalizedLineItem {
        description: raw.description.clone(),
        manufacturer_part_number: raw.manufacturer_part_number.clone(),
        original_uom: raw.original_uom.clone(),
        quantity: raw.quantity,
        unit_price: raw.unit_price,
        extension_price: raw.extension_price,
        canonical_uom: reason.is_none().then(|| "EA".to_string()),
        detected_pack_quantity: candidate.as_ref().map(|c| c.quantity_per_pack),
        price_per_base_unit,
        confidence: round2(confidence),
        escalation_flag: reason.is_some(),
        escalation_reason: reason.map(|r| r.as_str().to_string()),
    }
}

/// Classification driving resolution: the candidate's container when there
/// is one, otherwise the line's own UOM.
fn effective_unit_class(uom: Option<&str>, candidate: Option<&PackCandidate>) -> UnitClass {
    match candidate {
        Some(c) => units::classify(&c.container_unit),
        None => units::classify(uom.unwrap_or("")),
    }
}

/// Pack certainty scaled by how much the extraction path was trusted.
fn combined_confidence(raw: &RawLineItem, candidate: Option<&PackCandidate>) -> f64 {
    match candidate {
        Some(c) => (c.confidence * raw.line_confidence).clamp(0.0, 1.0),
        None => 0.0,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
