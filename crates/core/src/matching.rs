//! Content matching: proposes element -> slot associations with confidence
//! scores and reports coverage statistics.
//!
//! Scoring is name based. Names are reduced to lower-case alphanumeric
//! tokens; identical token sequences score [`EXACT_MATCH_SCORE`], identical
//! token sets in a different order score [`REORDERED_TOKENS_SCORE`], anything
//! else scores the Jaccard overlap of the token sets. Kinds must be equal for
//! a pair to be considered at all. Ties are broken by ordinal position inside
//! groups of equally-named elements/slots, then by document order.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::content::{ContentKind, ExtractionResult, SourceElement, TemplateSlot};
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default confidence floor. Nothing is flagged for review by default.
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.0;

/// Score for identical normalized names.
pub const EXACT_MATCH_SCORE: f64 = 1.0;

/// Score for names with the same tokens in a different order or multiplicity.
pub const REORDERED_TOKENS_SCORE: f64 = 0.95;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where an association came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Auto,
    Manual,
}

/// One proposed or approved element -> slot link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub element_index: usize,
    pub element_name: String,
    pub slot_index: usize,
    pub slot_name: String,
    pub kind: ContentKind,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f64,
    pub provenance: Provenance,
    /// Confidence fell below the configured floor.
    #[serde(default)]
    pub requires_review: bool,
}

impl Association {
    /// A human-made link. Manual associations carry full confidence.
    pub fn manual(
        element_index: usize,
        element: &SourceElement,
        slot_index: usize,
        slot: &TemplateSlot,
    ) -> Self {
        Self {
            element_index,
            element_name: element.name.clone(),
            slot_index,
            slot_name: slot.name.clone(),
            kind: slot.kind,
            confidence: 1.0,
            provenance: Provenance::Manual,
            requires_review: false,
        }
    }
}

/// Coverage statistics for one matching run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingStats {
    pub total_elements: usize,
    pub total_slots: usize,
    pub matched_slots: usize,
    /// `matched_slots / total_slots`, `None` when the template has no slots.
    pub coverage: Option<f64>,
    /// Mean confidence over accepted matches, `None` when there are none.
    pub average_confidence: Option<f64>,
    pub requires_review: usize,
    pub unmatched_elements: Vec<String>,
    pub unfilled_slots: Vec<String>,
}

/// Proposed associations plus their statistics. Stored with the Stage-1 payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingResult {
    pub associations: Vec<Association>,
    pub stats: MatchingStats,
}

/// Tunables for [`MatchingEngine`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchingConfig {
    /// Accepted matches below this confidence are flagged `requires_review`.
    pub confidence_floor: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Stateless matcher; safe to share across jobs and threads.
#[derive(Debug, Clone, Default)]
pub struct MatchingEngine {
    config: MatchingConfig,
}

struct Candidate {
    slot: usize,
    element: usize,
    score: f64,
    ordinal_gap: usize,
}

impl MatchingEngine {
    pub fn new(config: MatchingConfig) -> Result<Self, CoreError> {
        if !(0.0..=1.0).contains(&config.confidence_floor) {
            return Err(CoreError::Validation(format!(
                "confidence_floor must be between 0.0 and 1.0, got {}",
                config.confidence_floor
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Propose associations for an extraction result.
    pub fn propose_for(&self, extraction: &ExtractionResult) -> MatchingResult {
        self.propose(&extraction.elements, &extraction.slots)
    }

    /// Propose associations between `elements` and `slots`.
    ///
    /// Every slot receives at most one element and every element is used at
    /// most once. Empty inputs produce an empty result, never an error.
    pub fn propose(&self, elements: &[SourceElement], slots: &[TemplateSlot]) -> MatchingResult {
        let element_tokens: Vec<Vec<String>> =
            elements.iter().map(|e| normalize_tokens(&e.name)).collect();
        let slot_tokens: Vec<Vec<String>> =
            slots.iter().map(|s| normalize_tokens(&s.name)).collect();
        let element_ordinals = group_ordinals(&element_tokens);
        let slot_ordinals = group_ordinals(&slot_tokens);

        let mut candidates = Vec::new();
        for (si, slot) in slots.iter().enumerate() {
            for (ei, element) in elements.iter().enumerate() {
                if element.kind != slot.kind {
                    continue;
                }
                // Zero-overlap pairs are kept; they sort last.
                let score = token_similarity(&element_tokens[ei], &slot_tokens[si]);
                candidates.push(Candidate {
                    slot: si,
                    element: ei,
                    score,
                    ordinal_gap: element_ordinals[ei].abs_diff(slot_ordinals[si]),
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.ordinal_gap.cmp(&b.ordinal_gap))
                .then_with(|| a.slot.cmp(&b.slot))
                .then_with(|| a.element.cmp(&b.element))
        });

        let mut used_elements = HashSet::new();
        let mut filled_slots = HashSet::new();
        let mut associations = Vec::new();

        for c in candidates {
            if filled_slots.contains(&c.slot) || used_elements.contains(&c.element) {
                continue;
            }
            filled_slots.insert(c.slot);
            used_elements.insert(c.element);
            associations.push(Association {
                element_index: c.element,
                element_name: elements[c.element].name.clone(),
                slot_index: c.slot,
                slot_name: slots[c.slot].name.clone(),
                kind: slots[c.slot].kind,
                confidence: c.score.clamp(0.0, 1.0),
                provenance: Provenance::Auto,
                requires_review: c.score < self.config.confidence_floor,
            });
        }

        associations.sort_by_key(|a| a.slot_index);

        let stats = compute_stats(elements, slots, &associations);
        tracing::debug!(
            elements = elements.len(),
            slots = slots.len(),
            matched = stats.matched_slots,
            requires_review = stats.requires_review,
            "Matching proposal computed",
        );

        MatchingResult {
            associations,
            stats,
        }
    }
}

fn compute_stats(
    elements: &[SourceElement],
    slots: &[TemplateSlot],
    associations: &[Association],
) -> MatchingStats {
    let used: HashSet<usize> = associations.iter().map(|a| a.element_index).collect();
    let filled: HashSet<usize> = associations.iter().map(|a| a.slot_index).collect();

    let coverage = if slots.is_empty() {
        None
    } else {
        Some(associations.len() as f64 / slots.len() as f64)
    };
    let average_confidence = if associations.is_empty() {
        None
    } else {
        Some(associations.iter().map(|a| a.confidence).sum::<f64>() / associations.len() as f64)
    };

    MatchingStats {
        total_elements: elements.len(),
        total_slots: slots.len(),
        matched_slots: associations.len(),
        coverage,
        average_confidence,
        requires_review: associations.iter().filter(|a| a.requires_review).count(),
        unmatched_elements: elements
            .iter()
            .enumerate()
            .filter(|(i, _)| !used.contains(i))
            .map(|(_, e)| e.name.clone())
            .collect(),
        unfilled_slots: slots
            .iter()
            .enumerate()
            .filter(|(i, _)| !filled.contains(i))
            .map(|(_, s)| s.name.clone())
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Name similarity
// ---------------------------------------------------------------------------

/// Split a name into lower-case alphanumeric tokens.
pub fn normalize_tokens(name: &str) -> Vec<String> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Similarity of two names in `[0.0, 1.0]`.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    token_similarity(&normalize_tokens(a), &normalize_tokens(b))
}

fn token_similarity(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return EXACT_MATCH_SCORE;
    }
    let set_a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    if set_a == set_b {
        return REORDERED_TOKENS_SCORE;
    }
    let shared = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    shared as f64 / union as f64
}

/// Ordinal of each entry among entries with the same normalized name.
fn group_ordinals(tokens: &[Vec<String>]) -> Vec<usize> {
    let mut seen: HashMap<&[String], usize> = HashMap::new();
    tokens
        .iter()
        .map(|t| {
            let n = seen.entry(t.as_slice()).or_insert(0);
            let ordinal = *n;
            *n += 1;
            ordinal
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Structural checks for approved sets
// ---------------------------------------------------------------------------

/// Check that an approved association set is consistent with the extraction
/// it refers to: indices exist, names and kinds agree, confidences are in
/// range, and no element or slot appears twice.
pub fn check_association_set(
    associations: &[Association],
    extraction: &ExtractionResult,
) -> Result<(), CoreError> {
    let mut elements = HashSet::new();
    let mut slots = HashSet::new();

    for a in associations {
        let element = extraction.element(a.element_index).ok_or_else(|| {
            invalid(format!(
                "element index {} does not exist ({} elements extracted)",
                a.element_index,
                extraction.elements.len()
            ))
        })?;
        let slot = extraction.slot(a.slot_index).ok_or_else(|| {
            invalid(format!(
                "slot index {} does not exist ({} slots extracted)",
                a.slot_index,
                extraction.slots.len()
            ))
        })?;
        if element.name != a.element_name {
            return Err(invalid(format!(
                "element {} is '{}', not '{}'",
                a.element_index, element.name, a.element_name
            )));
        }
        if slot.name != a.slot_name {
            return Err(invalid(format!(
                "slot {} is '{}', not '{}'",
                a.slot_index, slot.name, a.slot_name
            )));
        }
        if element.kind != slot.kind || a.kind != slot.kind {
            return Err(invalid(format!(
                "'{}' ({}) cannot fill '{}' ({})",
                element.name,
                element.kind.as_str(),
                slot.name,
                slot.kind.as_str()
            )));
        }
        if !(0.0..=1.0).contains(&a.confidence) {
            return Err(invalid(format!(
                "confidence {} for '{}' is outside [0, 1]",
                a.confidence, a.slot_name
            )));
        }
        if !elements.insert(a.element_index) {
            return Err(invalid(format!(
                "element '{}' is mapped to more than one slot",
                a.element_name
            )));
        }
        if !slots.insert(a.slot_index) {
            return Err(invalid(format!(
                "slot '{}' has more than one element",
                a.slot_name
            )));
        }
    }
    Ok(())
}

fn invalid(detail: String) -> CoreError {
    CoreError::Validation(format!("Invalid association: {detail}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;

    fn el(name: &str, kind: ContentKind) -> SourceElement {
        SourceElement {
            name: name.to_string(),
            kind,
            geometry: Some(Geometry::sized(100.0, 100.0)),
        }
    }

    fn slot(name: &str, kind: ContentKind) -> TemplateSlot {
        TemplateSlot {
            name: name.to_string(),
            kind,
            geometry: Some(Geometry::sized(100.0, 100.0)),
        }
    }

    fn engine() -> MatchingEngine {
        MatchingEngine::default()
    }

    // -- name similarity ------------------------------------------------------

    #[test]
    fn normalization_ignores_case_and_punctuation() {
        assert_eq!(normalize_tokens("Hero_Image-01"), vec!["hero", "image", "01"]);
        assert_eq!(name_similarity("Hero Image", "hero-image"), 1.0);
    }

    #[test]
    fn reordered_tokens_score_below_exact() {
        assert_eq!(name_similarity("image hero", "hero image"), REORDERED_TOKENS_SCORE);
    }

    #[test]
    fn partial_overlap_is_jaccard() {
        // {product, title} vs {product, subtitle} -> 1 shared / 3 total
        let s = name_similarity("product title", "product subtitle");
        assert!((s - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn disjoint_and_empty_names_score_zero() {
        assert_eq!(name_similarity("logo", "headline"), 0.0);
        assert_eq!(name_similarity("---", "logo"), 0.0);
    }

    // -- propose --------------------------------------------------------------

    #[test]
    fn exact_names_match_with_full_confidence() {
        let result = engine().propose(
            &[el("Headline", ContentKind::Text), el("Logo", ContentKind::Image)],
            &[slot("logo", ContentKind::Image), slot("headline", ContentKind::Text)],
        );
        assert_eq!(result.associations.len(), 2);
        assert!(result.associations.iter().all(|a| a.confidence == 1.0));
        assert_eq!(result.stats.coverage, Some(1.0));
        assert_eq!(result.stats.average_confidence, Some(1.0));
        // Sorted by slot index.
        assert_eq!(result.associations[0].slot_name, "logo");
        assert_eq!(result.associations[0].element_name, "Logo");
    }

    #[test]
    fn mismatched_kinds_are_never_associated() {
        let result = engine().propose(
            &[el("logo", ContentKind::Text)],
            &[slot("logo", ContentKind::Image)],
        );
        assert!(result.associations.is_empty());
        assert_eq!(result.stats.coverage, Some(0.0));
        assert_eq!(result.stats.unfilled_slots, vec!["logo"]);
        assert_eq!(result.stats.unmatched_elements, vec!["logo"]);
    }

    #[test]
    fn element_is_consumed_by_best_slot_only() {
        let result = engine().propose(
            &[el("price", ContentKind::Text)],
            &[slot("price", ContentKind::Text), slot("price old", ContentKind::Text)],
        );
        assert_eq!(result.associations.len(), 1);
        assert_eq!(result.associations[0].slot_name, "price");
        assert_eq!(result.stats.unfilled_slots, vec!["price old"]);
        assert_eq!(result.stats.coverage, Some(0.5));
    }

    #[test]
    fn repeated_names_pair_by_ordinal() {
        let elements = vec![
            el("Bullet", ContentKind::Text),
            el("Bullet", ContentKind::Text),
            el("Bullet", ContentKind::Text),
        ];
        let slots = vec![
            slot("bullet", ContentKind::Text),
            slot("bullet", ContentKind::Text),
            slot("bullet", ContentKind::Text),
        ];
        let result = engine().propose(&elements, &slots);
        assert_eq!(result.associations.len(), 3);
        for a in &result.associations {
            assert_eq!(a.element_index, a.slot_index);
        }
    }

    #[test]
    fn no_element_used_twice_and_confidence_in_range() {
        let elements = vec![
            el("title", ContentKind::Text),
            el("title main", ContentKind::Text),
            el("photo", ContentKind::Image),
            el("photo alt", ContentKind::Image),
            el("cta", ContentKind::Text),
        ];
        let slots = vec![
            slot("title", ContentKind::Text),
            slot("main title", ContentKind::Text),
            slot("photo", ContentKind::Image),
            slot("photo", ContentKind::Image),
            slot("footer", ContentKind::Text),
        ];
        let result = engine().propose(&elements, &slots);
        let mut seen = HashSet::new();
        for a in &result.associations {
            assert!(seen.insert(a.element_index), "element reused: {a:?}");
            assert!((0.0..=1.0).contains(&a.confidence));
            assert_eq!(elements[a.element_index].kind, slots[a.slot_index].kind);
        }
        // The leftover text pair shares no tokens but is still proposed.
        let leftover = result
            .associations
            .iter()
            .find(|a| a.slot_name == "footer")
            .unwrap();
        assert_eq!(leftover.element_name, "cta");
        assert_eq!(leftover.confidence, 0.0);
        assert!(result.stats.unfilled_slots.is_empty());
        assert!(result.stats.unmatched_elements.is_empty());
    }

    #[test]
    fn same_kind_pair_without_shared_tokens_is_proposed() {
        let result = engine().propose(
            &[el("Title", ContentKind::Text)],
            &[slot("headline", ContentKind::Text)],
        );
        assert_eq!(result.associations.len(), 1);
        assert_eq!(result.associations[0].confidence, 0.0);
        assert_eq!(result.stats.coverage, Some(1.0));

        let strict = MatchingEngine::new(MatchingConfig {
            confidence_floor: 0.3,
        })
        .unwrap();
        let result = strict.propose(
            &[el("Title", ContentKind::Text)],
            &[slot("headline", ContentKind::Text)],
        );
        assert!(result.associations[0].requires_review);
    }

    #[test]
    fn empty_inputs_yield_empty_valid_result() {
        let result = engine().propose(&[], &[]);
        assert!(result.associations.is_empty());
        assert_eq!(result.stats.coverage, None);
        assert_eq!(result.stats.average_confidence, None);

        let result = engine().propose(&[], &[slot("logo", ContentKind::Image)]);
        assert_eq!(result.stats.coverage, Some(0.0));
        assert_eq!(result.stats.average_confidence, None);
    }

    #[test]
    fn floor_flags_low_confidence_without_dropping() {
        let engine = MatchingEngine::new(MatchingConfig {
            confidence_floor: 0.5,
        })
        .unwrap();
        let result = engine.propose(
            &[el("product title", ContentKind::Text)],
            &[slot("product subtitle", ContentKind::Text)],
        );
        assert_eq!(result.associations.len(), 1);
        assert!(result.associations[0].requires_review);
        assert_eq!(result.stats.requires_review, 1);
    }

    #[test]
    fn floor_outside_unit_range_rejected() {
        assert!(MatchingEngine::new(MatchingConfig {
            confidence_floor: 1.5
        })
        .is_err());
    }

    // -- check_association_set -----------------------------------------------

    fn extraction() -> ExtractionResult {
        ExtractionResult {
            elements: vec![el("logo", ContentKind::Image), el("title", ContentKind::Text)],
            slots: vec![slot("logo", ContentKind::Image), slot("title", ContentKind::Text)],
            source_canvas: None,
            template_canvas: None,
        }
    }

    #[test]
    fn proposed_set_passes_structural_check() {
        let ex = extraction();
        let proposed = engine().propose_for(&ex);
        assert!(check_association_set(&proposed.associations, &ex).is_ok());
    }

    #[test]
    fn duplicate_element_rejected() {
        let ex = extraction();
        let mut a = Association::manual(0, &ex.elements[0], 0, &ex.slots[0]);
        let b = a.clone();
        a.slot_index = 0;
        let err = check_association_set(&[a, b], &ex).unwrap_err();
        assert!(err.to_string().contains("more than one slot"));
    }

    #[test]
    fn kind_mismatch_rejected() {
        let ex = extraction();
        let a = Association::manual(0, &ex.elements[0], 1, &ex.slots[1]);
        let err = check_association_set(&[a], &ex).unwrap_err();
        assert!(err.to_string().contains("cannot fill"));
    }

    #[test]
    fn unknown_index_rejected() {
        let ex = extraction();
        let mut a = Association::manual(0, &ex.elements[0], 0, &ex.slots[0]);
        a.element_index = 9;
        assert!(check_association_set(&[a], &ex).is_err());
    }
}
