//! Contract review records and the review state machine.
//!
//! A review moves `PENDING -> PROCESSING -> COMPLETED | FAILED` and never
//! backward. The store enforces the transition table; the pipeline drives
//! it through a single writer per review.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::now_ts;

/// Lifecycle status of a contract review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    /// Created on upload; waiting for the pipeline.
    Pending,
    /// Pipeline stages are running.
    Processing,
    /// Finished with a populated result.
    Completed,
    /// Finished with an error (includes cancellation).
    Failed,
}

impl ReviewStatus {
    /// Whether the status may move to `to`. Transitions are monotonic.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed | Self::Failed)
        )
    }

    /// Whether the review has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stable string form used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Risk severity. Ordered so `max` picks the overall level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    /// Low severity.
    Low,
    /// Medium severity.
    Medium,
    /// High severity.
    High,
}

impl RiskLevel {
    /// Stable string form used in storage and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    /// Parses the stable string form; tolerates Chinese report labels.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "LOW" | "low" | "低" | "低风险" => Some(Self::Low),
            "MEDIUM" | "medium" | "中" | "中风险" => Some(Self::Medium),
            "HIGH" | "high" | "高" | "高风险" => Some(Self::High),
            _ => None,
        }
    }
}

/// A contract review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractReview {
    /// UUID of the review.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Uploaded filename.
    pub filename: String,
    /// Upload size in bytes.
    pub size: usize,
    /// sha-256 hex of the uploaded bytes.
    pub hash: String,
    /// Extracted contract text (set by the PARSING stage).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    /// Lifecycle status.
    pub status: ReviewStatus,
    /// Overall risk level (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    /// Total risk findings (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_risks: Option<usize>,
    /// Structured report model (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure reason (set on FAILED).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Unix timestamp when the review was created.
    pub created_at: i64,
    /// Unix timestamp when the review reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

impl ContractReview {
    /// Creates a new review in `PENDING` for an uploaded contract.
    #[must_use]
    pub fn new(user_id: &str, filename: &str, size: usize, hash: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            filename: filename.to_string(),
            size,
            hash: hash.to_string(),
            extracted_text: None,
            status: ReviewStatus::Pending,
            risk_level: None,
            total_risks: None,
            result: None,
            error_message: None,
            created_at: now_ts(),
            completed_at: None,
        }
    }
}

/// A single risk finding attached to a review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskClause {
    /// Unique identifier (assigned by the store).
    pub id: Option<i64>,
    /// Owning review.
    pub review_id: String,
    /// The clause text the finding refers to.
    pub clause_text: String,
    /// Risk dimension name (e.g. payment terms, liability).
    pub risk_type: String,
    /// Severity of this finding.
    pub risk_level: RiskLevel,
    /// What the risk is.
    pub description: String,
    /// Suggested modification.
    pub suggestion: String,
    /// Statutory basis, when the model cites one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legal_basis: Option<String>,
    /// Byte offset where the clause starts in the extracted text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_start: Option<usize>,
    /// Byte offset where the clause ends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_end: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_forward_only() {
        use ReviewStatus::{Completed, Failed, Pending, Processing};

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        // No backward or skipping transitions.
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_status_terminal() {
        assert!(!ReviewStatus::Pending.is_terminal());
        assert!(!ReviewStatus::Processing.is_terminal());
        assert!(ReviewStatus::Completed.is_terminal());
        assert!(ReviewStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ReviewStatus::Pending,
            ReviewStatus::Processing,
            ReviewStatus::Completed,
            ReviewStatus::Failed,
        ] {
            assert_eq!(ReviewStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ReviewStatus::parse("RUNNING"), None);
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        let max = [RiskLevel::Low, RiskLevel::High, RiskLevel::Medium]
            .into_iter()
            .max();
        assert_eq!(max, Some(RiskLevel::High));
    }

    #[test]
    fn test_risk_level_parse_chinese_labels() {
        assert_eq!(RiskLevel::parse("高"), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse("中风险"), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::parse("low"), Some(RiskLevel::Low));
        assert_eq!(RiskLevel::parse("none"), None);
    }

    #[test]
    fn test_review_new_starts_pending() {
        let review = ContractReview::new("u1", "contract.txt", 1024, "ff00");
        assert_eq!(review.status, ReviewStatus::Pending);
        assert!(review.result.is_none());
        assert!(review.completed_at.is_none());
        assert!(!review.id.is_empty());
    }

    #[test]
    fn test_review_serialization_skips_unset() {
        let review = ContractReview::new("u1", "c.txt", 10, "aa");
        let json = serde_json::to_string(&review).unwrap();
        assert!(json.contains("\"PENDING\""));
        assert!(!json.contains("risk_level"));
        assert!(!json.contains("error_message"));
    }

    #[test]
    fn test_risk_clause_serialization() {
        let clause = RiskClause {
            id: None,
            review_id: "r1".to_string(),
            clause_text: "违约金为合同总额的50%".to_string(),
            risk_type: "违约责任".to_string(),
            risk_level: RiskLevel::High,
            description: "违约金比例过高".to_string(),
            suggestion: "建议调整为不超过30%".to_string(),
            legal_basis: Some("民法典第五百八十五条".to_string()),
            position_start: Some(120),
            position_end: Some(140),
        };
        let json = serde_json::to_string(&clause).unwrap();
        let back: RiskClause = serde_json::from_str(&json).unwrap();
        assert_eq!(back, clause);
    }
}
