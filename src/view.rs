//! Filtered, searched and sorted view over normalized entities

use crate::types::*;
use serde::Serialize;
use std::cmp::Ordering;

/// Score at or above which a high-tier entity counts as critical
pub const CRITICAL_SCORE: f64 = 90.0;
/// Lower bound of the plain `high` filter band
pub const HIGH_SCORE: f64 = 70.0;

/// Compute the view for `query`.
///
/// Filters run before the sort: tier, then categories, then id search.
/// Pure and deterministic; the sort is stable so ties keep input order.
pub fn compute_view(entities: &[NormalizedEntity], query: &ViewQuery) -> Vec<NormalizedEntity> {
    let needle = query.search_text.trim().to_lowercase();
    let category_filters: Vec<(Option<Category>, String)> = query
        .extra_category_filters
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(name, value)| (name.parse::<Category>().ok(), value.trim().to_lowercase()))
        .collect();

    let mut view: Vec<NormalizedEntity> = entities
        .iter()
        .filter(|e| matches_tier(e, query.tier_filter))
        .filter(|e| {
            category_filters.iter().all(|(category, wanted)| {
                (*category)
                    .and_then(|c| e.filter_field(c))
                    .map(|have| have.to_lowercase() == *wanted)
                    .unwrap_or(false)
            })
        })
        .filter(|e| needle.is_empty() || e.id.to_lowercase().contains(&needle))
        .cloned()
        .collect();

    sort_view(&mut view, query.sort_key);
    view
}

pub fn matches_tier(entity: &NormalizedEntity, filter: TierFilter) -> bool {
    match filter {
        TierFilter::All => true,
        TierFilter::Critical => {
            entity.risk_tier == RiskTier::High && entity.risk_score >= CRITICAL_SCORE
        }
        TierFilter::High => {
            entity.risk_tier == RiskTier::High
                && entity.risk_score >= HIGH_SCORE
                && entity.risk_score < CRITICAL_SCORE
        }
        TierFilter::Medium => entity.risk_tier == RiskTier::Medium,
        TierFilter::Low => entity.risk_tier == RiskTier::Low,
    }
}

pub fn sort_view(view: &mut [NormalizedEntity], key: SortKey) {
    match key {
        SortKey::Unsorted => {}
        SortKey::ProbabilityDesc | SortKey::HighestRisk => {
            view.sort_by(|a, b| b.risk_score.total_cmp(&a.risk_score))
        }
        SortKey::LowestRisk => view.sort_by(|a, b| a.risk_score.total_cmp(&b.risk_score)),
        SortKey::IdAsc => view.sort_by(|a, b| compare_ids(&a.id, &b.id)),
    }
}

/// Natural id ordering: first digit run compared as an integer, then the full string.
///
/// Ids without digits sort after ids that have them.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (first_digit_run(a), first_digit_run(b)) {
        (Some(x), Some(y)) => compare_digit_runs(x, y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn first_digit_run(id: &str) -> Option<&str> {
    let start = id.find(|c: char| c.is_ascii_digit())?;
    let rest = &id[start..];
    let len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    Some(&rest[..len])
}

/// Compare unbounded decimal runs without parsing into a fixed-width integer
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Per-tier counts for the header above the grid
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewSummary {
    pub total: usize,
    pub visible: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl ViewSummary {
    pub fn new(entities: &[NormalizedEntity], view: &[NormalizedEntity]) -> Self {
        let count = |filter| entities.iter().filter(|e| matches_tier(e, filter)).count();
        Self {
            total: entities.len(),
            visible: view.len(),
            critical: count(TierFilter::Critical),
            high: count(TierFilter::High),
            medium: count(TierFilter::Medium),
            low: count(TierFilter::Low),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entity(id: &str, score: f64) -> NormalizedEntity {
        NormalizedEntity {
            id: id.to_string(),
            risk_score: score,
            risk_tier: RiskTier::from_score(score),
            reason: String::new(),
            strategy: String::new(),
            feature_values: Default::default(),
            attribution_values: BTreeMap::new(),
            filter_fields: BTreeMap::new(),
        }
    }

    fn with_contract(mut e: NormalizedEntity, contract: &str) -> NormalizedEntity {
        e.filter_fields.insert(Category::Contract, contract.to_string());
        e
    }

    fn ids(view: &[NormalizedEntity]) -> Vec<&str> {
        view.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_critical_filter() {
        let entities = vec![
            entity("a", 95.0),
            entity("b", 72.0),
            entity("c", 39.0),
            entity("d", 91.0),
        ];
        let query = ViewQuery {
            tier_filter: TierFilter::Critical,
            ..Default::default()
        };
        assert_eq!(ids(&compute_view(&entities, &query)), vec!["a", "d"]);
    }

    #[test]
    fn test_high_filter_excludes_critical_band() {
        let entities = vec![entity("a", 95.0), entity("b", 72.0), entity("c", 89.9)];
        let query = ViewQuery {
            tier_filter: TierFilter::High,
            ..Default::default()
        };
        assert_eq!(ids(&compute_view(&entities, &query)), vec!["b", "c"]);
    }

    #[test]
    fn test_id_asc_is_numeric() {
        let entities = vec![
            entity("entity-11", 50.0),
            entity("entity-2", 50.0),
            entity("entity-1", 50.0),
        ];
        let query = ViewQuery {
            sort_key: SortKey::IdAsc,
            ..Default::default()
        };
        assert_eq!(
            ids(&compute_view(&entities, &query)),
            vec!["entity-1", "entity-2", "entity-11"]
        );
    }

    #[test]
    fn test_compare_ids_ties_and_missing_digits() {
        assert_eq!(compare_ids("a-007", "b-7"), Ordering::Less);
        assert_eq!(compare_ids("x9", "alpha"), Ordering::Less);
        assert_eq!(compare_ids("beta", "alpha"), Ordering::Greater);
        assert_eq!(
            compare_ids("c99999999999999999999999", "c100000000000000000000000"),
            Ordering::Less
        );
    }

    #[test]
    fn test_sort_changes_order_not_membership() {
        let entities = vec![entity("a", 10.0), entity("b", 80.0), entity("c", 55.0)];
        let base = ViewQuery::default();
        let unsorted = compute_view(&entities, &base);
        let desc = compute_view(
            &entities,
            &ViewQuery {
                sort_key: SortKey::HighestRisk,
                ..base.clone()
            },
        );
        let asc = compute_view(
            &entities,
            &ViewQuery {
                sort_key: SortKey::LowestRisk,
                ..base.clone()
            },
        );

        assert_eq!(ids(&unsorted), vec!["a", "b", "c"]);
        assert_eq!(ids(&desc), vec!["b", "c", "a"]);
        assert_eq!(ids(&asc), vec!["a", "c", "b"]);

        let mut members: Vec<&str> = ids(&desc);
        members.sort();
        assert_eq!(members, ids(&unsorted));
    }

    #[test]
    fn test_stable_sort_keeps_input_order_for_ties() {
        let entities = vec![entity("x", 50.0), entity("y", 50.0), entity("z", 50.0)];
        let query = ViewQuery {
            sort_key: SortKey::ProbabilityDesc,
            ..Default::default()
        };
        let first = compute_view(&entities, &query);
        let second = compute_view(&entities, &query);
        assert_eq!(ids(&first), vec!["x", "y", "z"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_category_filter_is_case_insensitive_and_excludes_missing() {
        let entities = vec![
            with_contract(entity("a", 50.0), "Month-to-month"),
            with_contract(entity("b", 50.0), "Two year"),
            entity("c", 50.0),
        ];
        let mut filters = BTreeMap::new();
        filters.insert("contract".to_string(), "month-to-MONTH".to_string());
        let query = ViewQuery {
            extra_category_filters: filters,
            ..Default::default()
        };
        assert_eq!(ids(&compute_view(&entities, &query)), vec!["a"]);
    }

    #[test]
    fn test_empty_category_value_is_inactive_and_unknown_category_excludes() {
        let entities = vec![with_contract(entity("a", 50.0), "One year"), entity("b", 50.0)];

        let mut filters = BTreeMap::new();
        filters.insert("contract".to_string(), "".to_string());
        let query = ViewQuery {
            extra_category_filters: filters,
            ..Default::default()
        };
        assert_eq!(compute_view(&entities, &query).len(), 2);

        let mut filters = BTreeMap::new();
        filters.insert("region".to_string(), "north".to_string());
        let query = ViewQuery {
            extra_category_filters: filters,
            ..Default::default()
        };
        assert!(compute_view(&entities, &query).is_empty());
    }

    #[test]
    fn test_search_matches_id_only() {
        let mut e = entity("Customer12", 50.0);
        e.reason = "mentions customer99".to_string();
        let entities = vec![e, entity("Customer99", 20.0)];
        let query = ViewQuery {
            search_text: "  CUSTOMER99 ".to_string(),
            ..Default::default()
        };
        assert_eq!(ids(&compute_view(&entities, &query)), vec!["Customer99"]);
    }

    #[test]
    fn test_summary_counts() {
        let entities = vec![
            entity("a", 95.0),
            entity("b", 75.0),
            entity("c", 50.0),
            entity("d", 10.0),
        ];
        let view = compute_view(&entities, &ViewQuery::default());
        let summary = ViewSummary::new(&entities, &view);
        assert_eq!(
            summary,
            ViewSummary {
                total: 4,
                visible: 4,
                critical: 1,
                high: 1,
                medium: 1,
                low: 1
            }
        );
    }
}
