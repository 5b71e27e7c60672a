//! # Stage: Candidate Generator (exploratory mode)
//!
//! ## Responsibility
//! When the optimizer flags stagnation, the engine widens its search instead
//! of refining existing patterns. This module produces a ranked pool of
//! candidate pattern proposals from a category-keyed template catalog,
//! scored by an expected-impact heuristic.
//!
//! ## Guarantees
//! - Deduplicated: the same `(category, template)` pair maps to a stable
//!   dedup key, so repeated generation runs never emit duplicates
//! - Ranked: proposals come back sorted by expected impact, descending
//! - Decoupled: nothing here touches evaluation or lifecycle state, so the
//!   generation strategy can evolve independently
//!
//! ## NOT Responsible For
//! - Registering proposals as patterns or piloting them (orchestrator)
//! - Deciding when exploratory mode activates (optimizer)

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Proposal types
// ---------------------------------------------------------------------------

/// Content category a template applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    Headline,
    CallToAction,
    SocialProof,
    Layout,
    Imagery,
}

impl std::fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContentCategory::Headline => "headline",
            ContentCategory::CallToAction => "call_to_action",
            ContentCategory::SocialProof => "social_proof",
            ContentCategory::Layout => "layout",
            ContentCategory::Imagery => "imagery",
        };
        write!(f, "{s}")
    }
}

/// A proposed pattern, not yet in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternProposal {
    /// Fresh id for the pattern if the proposal is accepted.
    pub pattern_id: String,
    pub name: String,
    pub category: ContentCategory,
    pub hypothesis: String,
    /// Heuristic score, higher is better.
    pub expected_impact: f64,
    /// Stable key: identical template proposals collide here.
    pub dedup_key: String,
}

// ---------------------------------------------------------------------------
// CandidateGenerator trait
// ---------------------------------------------------------------------------

/// Context handed to a generator run.
#[derive(Debug, Clone, Default)]
pub struct ProposalContext {
    /// Categories already covered by live (non-retired) patterns; covered
    /// categories score lower.
    pub covered_categories: Vec<ContentCategory>,
    /// Best lift observed across the current catalog, used to scale scores.
    pub best_observed_lift: Option<f64>,
    /// Maximum number of proposals wanted.
    pub limit: usize,
}

/// Something that can propose new candidate patterns.
pub trait CandidateGenerator: Send + Sync {
    fn propose(&self, ctx: &ProposalContext) -> Vec<PatternProposal>;
}

// ---------------------------------------------------------------------------
// TemplateCatalog
// ---------------------------------------------------------------------------

/// One reusable proposal template.
#[derive(Debug, Clone)]
struct Template {
    category: ContentCategory,
    name: &'static str,
    hypothesis: &'static str,
    /// Prior impact estimate from historical campaigns, in percent lift.
    base_impact: f64,
}

/// The built-in category-keyed template catalog.
pub struct TemplateCatalog {
    templates: Vec<Template>,
    emitted: Mutex<HashSet<String>>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self {
            templates: vec![
                Template {
                    category: ContentCategory::Headline,
                    name: "Benefit-led headline",
                    hypothesis: "Leading with the primary benefit raises engagement",
                    base_impact: 12.0,
                },
                Template {
                    category: ContentCategory::Headline,
                    name: "Question headline",
                    hypothesis: "A question headline increases scroll depth",
                    base_impact: 7.0,
                },
                Template {
                    category: ContentCategory::CallToAction,
                    name: "Sticky CTA bar",
                    hypothesis: "A persistent CTA shortens the path to conversion",
                    base_impact: 15.0,
                },
                Template {
                    category: ContentCategory::CallToAction,
                    name: "First-person CTA copy",
                    hypothesis: "First-person copy raises click-through",
                    base_impact: 9.0,
                },
                Template {
                    category: ContentCategory::SocialProof,
                    name: "Inline testimonials",
                    hypothesis: "Testimonials near the CTA reduce hesitation",
                    base_impact: 10.0,
                },
                Template {
                    category: ContentCategory::Layout,
                    name: "Single-column form",
                    hypothesis: "A single-column form lowers abandonment",
                    base_impact: 8.0,
                },
                Template {
                    category: ContentCategory::Imagery,
                    name: "Product-in-context hero",
                    hypothesis: "Contextual hero imagery improves comprehension",
                    base_impact: 6.0,
                },
            ],
            emitted: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateGenerator for TemplateCatalog {
    fn propose(&self, ctx: &ProposalContext) -> Vec<PatternProposal> {
        let mut emitted = self.emitted.lock().unwrap_or_else(|e| e.into_inner());
        let mut proposals: Vec<PatternProposal> = self
            .templates
            .iter()
            .filter_map(|t| {
                let dedup_key = format!("{}:{}", t.category, t.name);
                if emitted.contains(&dedup_key) {
                    return None;
                }
                // Uncovered categories get a novelty bump; a catalog that is
                // already beating the template's prior scores it down.
                let novelty = if ctx.covered_categories.contains(&t.category) {
                    1.0
                } else {
                    1.5
                };
                let ceiling_discount = match ctx.best_observed_lift {
                    Some(best) if best > t.base_impact => 0.5,
                    _ => 1.0,
                };
                Some(PatternProposal {
                    pattern_id: Uuid::new_v4().to_string(),
                    name: t.name.to_string(),
                    category: t.category,
                    hypothesis: t.hypothesis.to_string(),
                    expected_impact: t.base_impact * novelty * ceiling_discount,
                    dedup_key,
                })
            })
            .collect();

        proposals.sort_by(|a, b| {
            b.expected_impact
                .partial_cmp(&a.expected_impact)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let limit = if ctx.limit == 0 { proposals.len() } else { ctx.limit };
        proposals.truncate(limit);
        for p in &proposals {
            emitted.insert(p.dedup_key.clone());
        }
        proposals
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(limit: usize) -> ProposalContext {
        ProposalContext {
            covered_categories: vec![],
            best_observed_lift: None,
            limit,
        }
    }

    #[test]
    fn test_proposals_ranked_descending() {
        let catalog = TemplateCatalog::new();
        let proposals = catalog.propose(&ctx(0));
        for pair in proposals.windows(2) {
            assert!(pair[0].expected_impact >= pair[1].expected_impact);
        }
    }

    #[test]
    fn test_limit_respected() {
        let catalog = TemplateCatalog::new();
        assert_eq!(catalog.propose(&ctx(3)).len(), 3);
    }

    #[test]
    fn test_repeated_runs_do_not_duplicate() {
        let catalog = TemplateCatalog::new();
        let first = catalog.propose(&ctx(0));
        let second = catalog.propose(&ctx(0));
        assert!(!first.is_empty());
        assert!(second.is_empty());
    }

    #[test]
    fn test_dedup_keys_unique_within_run() {
        let catalog = TemplateCatalog::new();
        let proposals = catalog.propose(&ctx(0));
        let keys: HashSet<&str> = proposals.iter().map(|p| p.dedup_key.as_str()).collect();
        assert_eq!(keys.len(), proposals.len());
    }

    #[test]
    fn test_covered_category_scores_lower() {
        let fresh = TemplateCatalog::new();
        let uncovered = fresh.propose(&ctx(0));
        let sticky_uncovered = uncovered
            .iter()
            .find(|p| p.name == "Sticky CTA bar")
            .unwrap()
            .expected_impact;

        let covered_catalog = TemplateCatalog::new();
        let covered = covered_catalog.propose(&ProposalContext {
            covered_categories: vec![ContentCategory::CallToAction],
            best_observed_lift: None,
            limit: 0,
        });
        let sticky_covered = covered
            .iter()
            .find(|p| p.name == "Sticky CTA bar")
            .unwrap()
            .expected_impact;
        assert!(sticky_covered < sticky_uncovered);
    }

    #[test]
    fn test_high_best_lift_discounts_weaker_templates() {
        let catalog = TemplateCatalog::new();
        let proposals = catalog.propose(&ProposalContext {
            covered_categories: vec![],
            best_observed_lift: Some(50.0),
            limit: 0,
        });
        // Every template prior is under 50, so all scores carry the discount.
        let max_base = 15.0 * 1.5;
        for p in &proposals {
            assert!(p.expected_impact <= max_base * 0.5 + 1e-9);
        }
    }

    #[test]
    fn test_fresh_ids_per_proposal() {
        let catalog = TemplateCatalog::new();
        let proposals = catalog.propose(&ctx(0));
        let ids: HashSet<&str> = proposals.iter().map(|p| p.pattern_id.as_str()).collect();
        assert_eq!(ids.len(), proposals.len());
    }
}
