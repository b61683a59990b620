//! Normalization of raw backend payloads into per-entity records

use crate::types::*;
use crate::view::compare_ids;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

const SCORES_KEYS: &[&str] = &["entity_scores"];
const REASONS_KEYS: &[&str] = &["reasons", "customer_reasons"];
const STRATEGIES_KEYS: &[&str] = &["strategies"];
const INSIGHTS_KEYS: &[&str] = &["insights", "customer_insights_values"];
const ATTRIBUTION_KEYS: &[&str] = &["attribution_values", "shap_feature_values"];
const PROBABILITY_KEY: &str = "churn_probability";

/// Filter value for an indicator that is present but not set
pub const INDICATOR_UNSET: &str = "Other";

/// Outcome of normalizing one payload
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Complete(Vec<NormalizedEntity>),
    /// Entities were produced but parts of the payload were unusable
    Partial {
        entities: Vec<NormalizedEntity>,
        warnings: Vec<String>,
    },
    Empty,
}

impl Normalized {
    pub fn entities(&self) -> &[NormalizedEntity] {
        match self {
            Normalized::Complete(entities) => entities,
            Normalized::Partial { entities, .. } => entities,
            Normalized::Empty => &[],
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Normalized::Partial { warnings, .. } => warnings,
            _ => &[],
        }
    }

    pub fn into_parts(self) -> (Vec<NormalizedEntity>, Vec<String>) {
        match self {
            Normalized::Complete(entities) => (entities, Vec::new()),
            Normalized::Partial { entities, warnings } => (entities, warnings),
            Normalized::Empty => (Vec::new(), Vec::new()),
        }
    }
}

/// Rescale a fractional score to 0-100; larger values pass through unchanged
pub fn scale_score(raw: f64) -> f64 {
    if raw <= 1.0 {
        raw * 100.0
    } else {
        raw
    }
}

/// Turn a raw payload into the canonical entity list.
///
/// Alignment is positional: index `i` of the score, reason and strategy
/// arrays describes the same entity. Only `insights` is joined by id.
///
/// Payloads straight from the prediction pipeline carry no score array;
/// their entities come from the insights map instead (see [`insight_rows`]).
pub fn normalize(raw: &RawAnalysisResult) -> Normalized {
    if !raw.is_object() {
        return Normalized::Empty;
    }

    let mut warnings = Vec::new();
    let insights = match raw.field(INSIGHTS_KEYS) {
        Some(Value::Object(map)) => Some(map),
        Some(Value::Null) | None => None,
        Some(_) => {
            warnings.push("insights is not an object; ignoring it".to_string());
            None
        }
    };

    let rows: Vec<(Option<String>, Option<f64>)> =
        match raw.field(SCORES_KEYS).and_then(Value::as_array) {
            Some(scores) if !scores.is_empty() => scores
                .iter()
                .map(|entry| (explicit_id(entry), resolve_score(entry)))
                .collect(),
            _ => match insights {
                Some(map) if !map.is_empty() => {
                    warnings.push(format!(
                        "no entity_scores; derived {} entities from insights",
                        map.len()
                    ));
                    insight_rows(map)
                }
                _ => return Normalized::Empty,
            },
        };

    let reasons = string_column(raw, REASONS_KEYS, "reasons", &mut warnings);
    let strategies = string_column(raw, STRATEGIES_KEYS, "strategies", &mut warnings);
    let (explicit, scores): (Vec<_>, Vec<_>) = rows.into_iter().unzip();
    let ids = assign_ids(explicit);

    let entities: Vec<NormalizedEntity> = ids
        .into_iter()
        .zip(scores)
        .enumerate()
        .map(|(i, (id, raw_score))| {
            let raw_score = raw_score.unwrap_or_else(|| {
                warnings.push(format!("{}: unparseable score, using 0", id));
                0.0
            });
            let risk_score = scale_score(raw_score);

            let insight = insights.and_then(|m| m.get(&id)).and_then(Value::as_object);
            let feature_values = insight
                .and_then(|o| o.get("feature_values"))
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let attribution_values = insight
                .and_then(|o| ATTRIBUTION_KEYS.iter().find_map(|k| o.get(*k)))
                .and_then(Value::as_object)
                .map(numeric_map)
                .unwrap_or_default();
            let filter_fields = extract_filter_fields(&feature_values);

            NormalizedEntity {
                risk_tier: RiskTier::from_score(risk_score),
                risk_score,
                reason: reasons.get(i).cloned().unwrap_or_default(),
                strategy: strategies.get(i).cloned().unwrap_or_default(),
                feature_values,
                attribution_values,
                filter_fields,
                id,
            }
        })
        .collect();

    if warnings.is_empty() {
        Normalized::Complete(entities)
    } else {
        for w in &warnings {
            warn!("Normalization: {}", w);
        }
        Normalized::Partial { entities, warnings }
    }
}

/// One row per insights entry, keyed by id in natural id order.
///
/// The score is the entry's `churn_probability`. The pipeline emits
/// `Customer0..CustomerN` in row order, so natural order restores it and
/// keeps `reasons[i]` aligned.
fn insight_rows(insights: &Map<String, Value>) -> Vec<(Option<String>, Option<f64>)> {
    let mut ids: Vec<&String> = insights.keys().collect();
    ids.sort_by(|a, b| compare_ids(a, b));
    ids.into_iter()
        .map(|id| {
            let score = insights
                .get(id)
                .and_then(|entry| entry.get(PROBABILITY_KEY))
                .and_then(score_value);
            (Some(id.clone()), score)
        })
        .collect()
}

fn string_column(
    raw: &RawAnalysisResult,
    keys: &[&str],
    label: &str,
    warnings: &mut Vec<String>,
) -> Vec<String> {
    match raw.field(keys) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(_) => {
            warnings.push(format!("{} is not an array; using empty values", label));
            Vec::new()
        }
    }
}

fn explicit_id(entry: &Value) -> Option<String> {
    match entry.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Fill missing ids with `entity-<i+1>`, suffixed until no other entity uses it
fn assign_ids(explicit: Vec<Option<String>>) -> Vec<String> {
    let mut taken: HashSet<String> = explicit.iter().flatten().cloned().collect();
    explicit
        .into_iter()
        .enumerate()
        .map(|(i, id)| {
            if let Some(id) = id {
                return id;
            }
            let base = format!("entity-{}", i + 1);
            let mut candidate = base.clone();
            let mut n = 2;
            while taken.contains(&candidate) {
                candidate = format!("{}-{}", base, n);
                n += 1;
            }
            taken.insert(candidate.clone());
            candidate
        })
        .collect()
}

fn resolve_score(entry: &Value) -> Option<f64> {
    match entry {
        Value::Object(obj) => obj.get("score").and_then(score_value),
        // Bare numbers are accepted as scores without ids
        other => score_value(other),
    }
}

fn score_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|s| s.is_finite())
}

fn numeric_map(obj: &Map<String, Value>) -> BTreeMap<String, f64> {
    obj.iter()
        .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
        .collect()
}

fn extract_filter_fields(features: &Map<String, Value>) -> BTreeMap<Category, String> {
    Category::ALL
        .iter()
        .filter_map(|category| {
            let text = match category.source_keys().iter().find_map(|k| features.get(*k)) {
                Some(value) => display_value(value)?,
                None => indicator_label(*category, features)?,
            };
            (!text.is_empty()).then_some((*category, text))
        })
        .collect()
}

fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Category label recovered from its 0/1 indicator feature
fn indicator_label(category: Category, features: &Map<String, Value>) -> Option<String> {
    let (key, label) = category.indicator()?;
    let set = match features.get(key)? {
        Value::Bool(b) => *b,
        other => score_value(other)? != 0.0,
    };
    let text = if set { label } else { INDICATOR_UNSET };
    Some(text.to_string())
}
