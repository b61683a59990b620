//! Core type definitions for risk analysis jobs and their derived views

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// Raw result payload returned by the analysis backend.
///
/// Kept as loose JSON: the backend's shape is not guaranteed, and the
/// normalizer degrades instead of failing on a malformed payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawAnalysisResult(pub Value);

impl RawAnalysisResult {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Top-level field lookup, trying each alias in order
    pub fn field(&self, names: &[&str]) -> Option<&Value> {
        let obj = self.0.as_object()?;
        names.iter().find_map(|name| obj.get(*name))
    }

    pub fn is_object(&self) -> bool {
        self.0.is_object()
    }
}

impl From<Value> for RawAnalysisResult {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Coarse risk bucket derived from a 0-100 score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    /// `<40` low, `[40,70]` medium, `>70` high
    pub fn from_score(score: f64) -> Self {
        if score < 40.0 {
            RiskTier::Low
        } else if score <= 70.0 {
            RiskTier::Medium
        } else {
            RiskTier::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categorical fields pre-extracted from an entity's feature values
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Contract,
    InternetService,
    PaymentMethod,
    MonthlyCharges,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Contract,
        Category::InternetService,
        Category::PaymentMethod,
        Category::MonthlyCharges,
    ];

    /// Feature keys probed for this category: primary first, then the alternate spelling
    pub fn source_keys(&self) -> [&'static str; 2] {
        match self {
            Category::Contract => ["Contract", "contract"],
            Category::InternetService => ["InternetService", "internet_service"],
            Category::PaymentMethod => ["PaymentMethod", "payment_method"],
            Category::MonthlyCharges => ["MonthlyCharges", "monthly_charges"],
        }
    }

    /// 0/1 indicator the backend derives from this category's column, and
    /// the label it stands for when set.
    ///
    /// The raw `Contract`, `InternetService` and `PaymentMethod` columns are
    /// dropped before inference, so only the indicator reaches `feature_values`.
    pub fn indicator(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Category::Contract => Some(("isMonth", "Month-to-month")),
            Category::InternetService => Some(("isFiber", "Fiber optic")),
            Category::PaymentMethod => Some(("isElectronic", "Electronic check")),
            Category::MonthlyCharges => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Contract => "contract",
            Category::InternetService => "internet_service",
            Category::PaymentMethod => "payment_method",
            Category::MonthlyCharges => "monthly_charges",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "contract" | "plan" => Ok(Category::Contract),
            "internet_service" | "internetservice" | "service" => Ok(Category::InternetService),
            "payment_method" | "paymentmethod" | "payment" => Ok(Category::PaymentMethod),
            "monthly_charges" | "monthlycharges" | "charges" => Ok(Category::MonthlyCharges),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

/// Canonical per-entity record produced by the normalizer.
///
/// Immutable once created; a new payload replaces the whole set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEntity {
    pub id: String,
    pub risk_score: f64,
    pub risk_tier: RiskTier,
    pub reason: String,
    pub strategy: String,
    pub feature_values: Map<String, Value>,
    pub attribution_values: BTreeMap<String, f64>,
    pub filter_fields: BTreeMap<Category, String>,
}

impl NormalizedEntity {
    pub fn filter_field(&self, category: Category) -> Option<&str> {
        self.filter_fields.get(&category).map(|s| s.as_str())
    }

    /// Attributions sorted by absolute magnitude, strongest first
    pub fn top_attributions(&self, limit: usize) -> Vec<(&str, f64)> {
        let mut pairs: Vec<(&str, f64)> = self
            .attribution_values
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        pairs.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        pairs.truncate(limit);
        pairs
    }
}

/// Status of a backend job as reported by the status endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Done | JobPhase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Pending => "pending",
            JobPhase::Processing => "processing",
            JobPhase::Done => "done",
            JobPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The job currently tracked by the poller
#[derive(Debug, Clone)]
pub struct JobState {
    pub task_id: String,
    pub phase: JobPhase,
    /// Start of the wait ceiling
    pub started_at: Instant,
    pub result: Option<RawAnalysisResult>,
    pub error: Option<String>,
}

impl JobState {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            phase: JobPhase::Pending,
            started_at: Instant::now(),
            result: None,
            error: None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Response from the job submission endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
}

/// Response from the job status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub status: JobPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RawAnalysisResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl JobStatusResponse {
    pub fn with_status(status: JobPhase) -> Self {
        Self {
            task_id: None,
            status,
            result: None,
            error: None,
            created_at: None,
            completed_at: None,
        }
    }

    pub fn done(result: RawAnalysisResult) -> Self {
        Self {
            result: Some(result),
            ..Self::with_status(JobPhase::Done)
        }
    }

    pub fn failed(error: Option<String>) -> Self {
        Self {
            error,
            ..Self::with_status(JobPhase::Failed)
        }
    }
}

/// A CSV file to submit for analysis
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Risk tier filter offered to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierFilter {
    #[default]
    All,
    /// High tier with score >= 90
    Critical,
    /// High tier with 70 <= score < 90
    High,
    Medium,
    Low,
}

impl FromStr for TierFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(TierFilter::All),
            "critical" => Ok(TierFilter::Critical),
            "high" => Ok(TierFilter::High),
            "medium" => Ok(TierFilter::Medium),
            "low" => Ok(TierFilter::Low),
            other => Err(format!("unknown tier filter '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
    /// Input order
    #[default]
    Unsorted,
    ProbabilityDesc,
    HighestRisk,
    LowestRisk,
    IdAsc,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "default" => Ok(SortKey::Unsorted),
            "probability-desc" => Ok(SortKey::ProbabilityDesc),
            "highest-risk" => Ok(SortKey::HighestRisk),
            "lowest-risk" => Ok(SortKey::LowestRisk),
            "id-asc" => Ok(SortKey::IdAsc),
            other => Err(format!("unknown sort key '{}'", other)),
        }
    }
}

/// Filter/search/sort inputs owned by the presentation layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewQuery {
    pub tier_filter: TierFilter,
    pub search_text: String,
    pub sort_key: SortKey,
    /// Category name -> required value; empty values are inactive
    pub extra_category_filters: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(RiskTier::from_score(39.99), RiskTier::Low);
        assert_eq!(RiskTier::from_score(40.0), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(70.0), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(70.01), RiskTier::High);
        assert_eq!(RiskTier::from_score(100.0), RiskTier::High);
    }

    #[test]
    fn test_status_response_parses_backend_shape() {
        let body = json!({
            "task_id": "abc",
            "status": "processing",
            "created_at": "2024-01-01T00:00:00"
        });
        let parsed: JobStatusResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.status, JobPhase::Processing);
        assert!(parsed.result.is_none());
        assert!(!parsed.status.is_terminal());
    }

    #[test]
    fn test_query_tokens_parse() {
        assert_eq!("Critical".parse::<TierFilter>().unwrap(), TierFilter::Critical);
        assert_eq!("".parse::<TierFilter>().unwrap(), TierFilter::All);
        assert_eq!("id-asc".parse::<SortKey>().unwrap(), SortKey::IdAsc);
        assert_eq!("plan".parse::<Category>().unwrap(), Category::Contract);
        assert!("bogus".parse::<SortKey>().is_err());
    }

    #[test]
    fn test_raw_field_aliases() {
        let raw = RawAnalysisResult::new(json!({ "customer_reasons": ["a"] }));
        assert!(raw.field(&["reasons", "customer_reasons"]).is_some());
        assert!(raw.field(&["strategies"]).is_none());
    }
}
