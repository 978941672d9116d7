// src/uom/policy.rs

//! Escalation policy.
//!
//! One pure decision per line over the evidence the other modules gathered.
//! Causes are checked most fundamental first so the recorded reason is the
//! root problem: a gallon line with a bad cross-check is escalated for being
//! a gallon line, not for its arithmetic.

use std::fmt;

use super::units::UnitClass;
use super::PackCandidate;

/// Why a line went to human review. The strings are output contract text
/// consumed downstream, not log messages; do not reword them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationReason {
    MeasurableUnit,
    NoPackQuantity,
    LowConfidence,
    PriceInconsistent,
}

impl EscalationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MeasurableUnit => "measurable unit not convertible to EA",
            Self::NoPackQuantity => "no pack quantity found",
            Self::LowConfidence => "low-confidence pack detection",
            Self::PriceInconsistent => "price inconsistent with computed pack",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide whether a line escalates; `None` means accept and normalize to EA.
///
/// Priority: measurable unit, then missing candidate, then weak or
/// hint-flagged evidence, then a failed price cross-check. No branch ever
/// substitutes a pack quantity of 1 for an unknown case — absence of
/// evidence escalates, it never defaults.
pub fn decide(
    candidate: Option<&PackCandidate>,
    unit_class: UnitClass,
    conversion_safe: bool,
    confidence: f64,
    confidence_threshold: f64,
) -> Option<EscalationReason> {
    if unit_class == UnitClass::MeasurablePhysical {
        return Some(EscalationReason::MeasurableUnit);
    }
    let Some(candidate) = candidate else {
        return Some(EscalationReason::NoPackQuantity);
    };
    if confidence < confidence_threshold || candidate.escalation_hint {
        return Some(EscalationReason::LowConfidence);
    }
    if !conversion_safe {
        return Some(EscalationReason::PriceInconsistent);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uom::{CandidateSource, UnitOfCount};

    const THRESHOLD: f64 = 0.6;

    fn candidate(confidence: f64, escalation_hint: bool) -> PackCandidate {
        PackCandidate {
            quantity_per_pack: 25,
            unit_of_count: UnitOfCount::Each,
            container_unit: "CS".to_string(),
            source: CandidateSource::Deterministic,
            confidence,
            matched_text: Some("25/CS".to_string()),
            escalation_hint,
        }
    }

    #[test]
    fn reason_strings_are_exact() {
        assert_eq!(
            EscalationReason::MeasurableUnit.as_str(),
            "measurable unit not convertible to EA"
        );
        assert_eq!(EscalationReason::NoPackQuantity.as_str(), "no pack quantity found");
        assert_eq!(EscalationReason::LowConfidence.as_str(), "low-confidence pack detection");
        assert_eq!(
            EscalationReason::PriceInconsistent.as_str(),
            "price inconsistent with computed pack"
        );
    }

    #[test]
    fn accepts_confident_consistent_lines() {
        let c = candidate(1.0, false);
        assert_eq!(
            decide(Some(&c), UnitClass::CountableContainer, true, 0.85, THRESHOLD),
            None
        );
    }

    #[test]
    fn measurable_outranks_every_other_cause() {
        let c = candidate(0.1, true);
        assert_eq!(
            decide(Some(&c), UnitClass::MeasurablePhysical, false, 0.1, THRESHOLD),
            Some(EscalationReason::MeasurableUnit)
        );
        assert_eq!(
            decide(None, UnitClass::MeasurablePhysical, false, 0.0, THRESHOLD),
            Some(EscalationReason::MeasurableUnit)
        );
    }

    #[test]
    fn missing_candidate_outranks_confidence_and_price() {
        assert_eq!(
            decide(None, UnitClass::CountableContainer, false, 0.0, THRESHOLD),
            Some(EscalationReason::NoPackQuantity)
        );
    }

    #[test]
    fn weak_evidence_outranks_the_cross_check() {
        let c = candidate(0.5, false);
        assert_eq!(
            decide(Some(&c), UnitClass::CountableContainer, false, 0.5, THRESHOLD),
            Some(EscalationReason::LowConfidence)
        );
    }

    #[test]
    fn lookup_hint_escalates_despite_high_confidence() {
        let c = candidate(0.9, true);
        assert_eq!(
            decide(Some(&c), UnitClass::CountableContainer, true, 0.9, THRESHOLD),
            Some(EscalationReason::LowConfidence)
        );
    }

    #[test]
    fn failed_cross_check_is_the_last_resort_reason() {
        let c = candidate(1.0, false);
        assert_eq!(
            decide(Some(&c), UnitClass::CountableContainer, false, 0.85, THRESHOLD),
            Some(EscalationReason::PriceInconsistent)
        );
    }

    #[test]
    fn threshold_is_strict() {
        let c = candidate(0.6, false);
        assert_eq!(
            decide(Some(&c), UnitClass::CountableContainer, true, 0.6, THRESHOLD),
            None
        );
        assert_eq!(
            decide(Some(&c), UnitClass::CountableContainer, true, 0.59, THRESHOLD),
            Some(EscalationReason::LowConfidence)
        );
    }

    #[test]
    fn flag_is_monotonic_in_confidence() {
        // When the trigger is the unit class or the cross-check, raising
        // confidence must never clear the flag (the reason may refine).
        let c = candidate(1.0, false);
        for conf in [0.0, 0.3, 0.61, 0.99, 1.0] {
            assert!(decide(Some(&c), UnitClass::MeasurablePhysical, true, conf, THRESHOLD).is_some());
            assert!(decide(Some(&c), UnitClass::CountableContainer, false, conf, THRESHOLD).is_some());
        }
        // When weak confidence was the sole cause, crossing the threshold
        // clears the flag and never re-raises it.
        let mut escalated_after_accept = false;
        let mut last_flag = true;
        for conf in [0.0, 0.2, 0.4, 0.6, 0.8, 1.0] {
            let flag =
                decide(Some(&c), UnitClass::CountableContainer, true, conf, THRESHOLD).is_some();
            if !last_flag && flag {
                escalated_after_accept = true;
            }
            last_flag = flag;
        }
        assert!(!escalated_after_accept);
    }

    #[test]
    fn decide_is_idempotent() {
        let c = candidate(0.5, false);
        let first = decide(Some(&c), UnitClass::CountableContainer, false, 0.5, THRESHOLD);
        let second = decide(Some(&c), UnitClass::CountableContainer, false, 0.5, THRESHOLD);
        assert_eq!(first, second);
    }
}
