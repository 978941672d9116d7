//! Unit canonicalization table.
//!
//! Single source of truth for unit-token classification, consulted by both
//! the pack-expression parser and the escalation policy. The table is static
//! and read-only for the whole process; it is the only state shared across
//! line items.
//!
//! Token families:
//! 1. EA-equivalent (safe base units): EA, EACH, UNIT, UN, PC, PCS, PIECE, ITEM
//! 2. Fixed multipliers: PR/PAIR (x2), DZ/DOZ/DOZEN (x12), GR/GROSS (x144)
//! 3. Pack/container: PK, BX, CS, CT, BG, RL, DP, SET, KIT — convertible only
//!    when a pack quantity is evidenced, otherwise escalate
//! 4. Count (COUNT/CNT): ambiguous, treated as pack-based
//! 5. Measurable (LB, GAL, FT, ...): never convertible to EA

/// Classification of a unit token, driving both conversion safety and
/// escalation. Unknown or absent tokens classify as `CountableContainer`;
/// without an evidenced pack quantity that is indistinguishable from
/// "no pack found" downstream, which is the safe direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitClass {
    /// Container or count unit (case, box, pack, ...) — convertible to EA
    /// only when the pack quantity is known from text or lookup.
    CountableContainer,
    /// Physical dimension/weight/volume/time unit — never convertible to EA.
    MeasurablePhysical,
    /// Already the base unit (each).
    BaseUnit,
}

/// Count units with a fixed base-unit multiplier: (canonical key, multiplier).
/// The token itself is textual evidence for the quantity.
const FIXED_MULTIPLIERS: &[(&str, u32)] = &[("PR", 2), ("DZ", 12), ("GROSS", 144)];

/// Spellings of the fixed-multiplier counts, for the parser's leading-count
/// alternation ("100PR/DP", "4DZ/CS").
pub(crate) const FIXED_COUNT_TOKENS: &[&str] = &["PR", "PAIR", "DZ", "DOZ", "DOZEN", "GR", "GROSS"];

/// Container tokens that need a pack quantity from the description or lookup.
/// CT is ambiguous (carton vs count) and lands here with the cartons.
pub(crate) const CONTAINERS: &[&str] = &[
    "PK", "PACK", "PAC", "BX", "BOX", "CS", "CASE", "CTN", "CT", "CARTON", "BG", "BAG", "RL",
    "ROL", "ROLL", "DP", "DISP", "DISPLAY", "SET", "KIT",
];

/// Explicit count tokens — ambiguous, treated like containers.
pub(crate) const COUNTS: &[&str] = &["COUNT", "CNT"];

/// Dimension, weight, volume and time units. Converting any of these to a
/// count would require density/size data the invoice does not carry.
const MEASURABLE: &[&str] = &[
    "FT", "IN", "M", "CM", "MM", "YD", "METER", "METRE", "SF", "SQFT", "M2", "SQ", "SQM", "LB",
    "LBS", "OZ", "KG", "G", "GRAM", "GM", "GAL", "GALLON", "QT", "PT", "L", "LITER", "LITRE",
    "ML", "HR", "HRS", "HOUR", "MIN", "MINUTE",
];

/// Alias → canonical key. Tokens not listed canonicalize to themselves.
const ALIASES: &[(&str, &str)] = &[
    ("EA", "EA"),
    ("EACH", "EA"),
    ("UNIT", "EA"),
    ("UN", "EA"),
    ("PC", "EA"),
    ("PCS", "EA"),
    ("PIECE", "EA"),
    ("ITEM", "EA"),
    ("PR", "PR"),
    ("PAIR", "PR"),
    ("DZ", "DZ"),
    ("DOZ", "DZ"),
    ("DOZEN", "DZ"),
    ("GR", "GROSS"),
    ("GROSS", "GROSS"),
    ("CS", "CS"),
    ("CASE", "CS"),
    ("BX", "BX"),
    ("BOX", "BX"),
    ("PK", "PK"),
    ("PACK", "PK"),
    ("PAC", "PK"),
    ("CTN", "CT"),
    ("CT", "CT"),
    ("CARTON", "CT"),
    ("BG", "BG"),
    ("BAG", "BG"),
    ("RL", "RL"),
    ("ROL", "RL"),
    ("ROLL", "RL"),
    ("DP", "DP"),
    ("DISP", "DP"),
    ("DISPLAY", "DP"),
];

/// Normalize a raw UOM string to its canonical key. Returns `None` for
/// empty/whitespace input; unknown tokens pass through uppercased.
pub fn canonical_key(raw: &str) -> Option<String> {
    let token = raw.trim().trim_end_matches('.').to_uppercase();
    if token.is_empty() {
        return None;
    }
    for (alias, key) in ALIASES {
        if *alias == token {
            return Some((*key).to_string());
        }
    }
    Some(token)
}

/// Classify a unit token. Empty and unknown tokens both classify as
/// `CountableContainer` — downstream treats an unknown container with no
/// evidenced pack quantity exactly like "no pack found".
pub fn classify(raw: &str) -> UnitClass {
    let Some(key) = canonical_key(raw) else {
        return UnitClass::CountableContainer;
    };
    if MEASURABLE.contains(&key.as_str()) {
        return UnitClass::MeasurablePhysical;
    }
    if key == "EA" {
        return UnitClass::BaseUnit;
    }
    UnitClass::CountableContainer
}

/// True if the (canonicalized) token appears anywhere in the table.
pub fn is_known(raw: &str) -> bool {
    match canonical_key(raw) {
        Some(key) => {
            let k = key.as_str();
            k == "EA"
                || FIXED_MULTIPLIERS.iter().any(|(f, _)| *f == k)
                || CONTAINERS.contains(&k)
                || COUNTS.contains(&k)
                || MEASURABLE.contains(&k)
        }
        None => false,
    }
}

/// True if the token is a physical measurable unit (LB, GAL, FT, ...).
pub fn is_measurable(raw: &str) -> bool {
    classify(raw) == UnitClass::MeasurablePhysical
}

/// Base-unit multiplier for count units whose quantity is definitional:
/// EA-equivalents count 1, a pair is 2, a dozen 12, a gross 144.
/// Containers and measurables have no fixed factor.
pub fn count_unit_factor(raw: &str) -> Option<u32> {
    let key = canonical_key(raw)?;
    if key == "EA" {
        return Some(1);
    }
    FIXED_MULTIPLIERS
        .iter()
        .find(|(f, _)| *f == key)
        .map(|(_, factor)| *factor)
}
