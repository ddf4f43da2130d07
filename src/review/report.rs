//! Report model assembly.
//!
//! Merges the rule-derived risk statistics with the model's prose into
//! the report JSON. Every section is present in the output: an empty
//! section serializes as `[]` or `null`, never goes missing.

use super::prompts::{KeyClause, RiskDimension};
use crate::core::{RiskClause, RiskLevel};
use serde::{Deserialize, Serialize};

/// The assembled report model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportModel {
    /// Executive summary block.
    pub executive_summary: ExecutiveSummary,
    /// Deep analysis block.
    pub deep_analysis: DeepAnalysis,
    /// Prioritized improvement suggestions.
    pub improvement_suggestions: Vec<ImprovementSuggestion>,
}

/// Executive summary of the review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutiveSummary {
    /// Contract type, when the analysis could infer one.
    pub contract_type: Option<String>,
    /// Overall risk level (max over dimensions).
    pub risk_level: RiskLevel,
    /// Why the overall level was assigned.
    pub reason: String,
    /// The most severe risk points.
    pub core_risks: Vec<String>,
    /// Immediate actions.
    pub action_suggestions: Vec<String>,
}

/// Deep analysis block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepAnalysis {
    /// Legal nature of the contract, when inferred.
    pub legal_nature: Option<String>,
    /// Key-clause analysis.
    pub key_clauses: Vec<KeyClause>,
    /// Per-dimension risk assessments.
    pub risk_assessments: Vec<RiskDimension>,
    /// Compliance score block.
    pub compliance: Compliance,
    /// Business impact notes, when inferred.
    pub business_impact: Option<String>,
}

/// Compliance score block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compliance {
    /// `100 - min(40, high*15 + medium*7 + low*2)`.
    pub score: u8,
    /// Risk counts behind the score.
    pub high_risks: usize,
    /// Medium-severity count.
    pub medium_risks: usize,
    /// Low-severity count.
    pub low_risks: usize,
}

/// One improvement suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImprovementSuggestion {
    /// Priority label derived from the dimension's risk level.
    pub priority: String,
    /// The problem being addressed.
    pub problem: String,
    /// The concrete modification.
    pub modification: String,
    /// Expected effect of the change.
    pub expected_effect: String,
}

/// Computes the compliance score from risk counts.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn compliance_score(high: usize, medium: usize, low: usize) -> u8 {
    let penalty = (high * 15 + medium * 7 + low * 2).min(40);
    (100 - penalty) as u8
}

/// Overall risk level: the maximum across dimensions, `Low` when there
/// are none.
#[must_use]
pub fn overall_risk_level(dimensions: &[RiskDimension]) -> RiskLevel {
    dimensions
        .iter()
        .map(RiskDimension::level)
        .max()
        .unwrap_or(RiskLevel::Low)
}

/// Assembles the report model from both analysis passes.
#[must_use]
pub fn assemble_report(dimensions: &[RiskDimension], clauses: &[KeyClause]) -> ReportModel {
    let high = count_level(dimensions, RiskLevel::High);
    let medium = count_level(dimensions, RiskLevel::Medium);
    let low = count_level(dimensions, RiskLevel::Low);
    let risk_level = overall_risk_level(dimensions);

    let core_risks: Vec<String> = dimensions
        .iter()
        .filter(|d| d.level() >= RiskLevel::Medium)
        .flat_map(|d| d.risk_points.iter().cloned())
        .collect();

    let action_suggestions: Vec<String> = dimensions
        .iter()
        .filter(|d| d.level() == RiskLevel::High)
        .flat_map(|d| d.improvements.iter().cloned())
        .collect();

    let reason = dimensions
        .iter()
        .max_by_key(|d| d.level())
        .map_or_else(
            || "未发现明显风险。".to_string(),
            |d| format!("{}：{}", d.dimension_name, d.description),
        );

    let improvement_suggestions = dimensions
        .iter()
        .flat_map(|dimension| {
            let priority = match dimension.level() {
                RiskLevel::High => "高",
                RiskLevel::Medium => "中",
                RiskLevel::Low => "低",
            };
            dimension.improvements.iter().map(move |improvement| {
                ImprovementSuggestion {
                    priority: priority.to_string(),
                    problem: dimension.description.clone(),
                    modification: improvement.clone(),
                    expected_effect: format!("降低{}风险", dimension.dimension_name),
                }
            })
        })
        .collect();

    ReportModel {
        executive_summary: ExecutiveSummary {
            contract_type: None,
            risk_level,
            reason,
            core_risks,
            action_suggestions,
        },
        deep_analysis: DeepAnalysis {
            legal_nature: None,
            key_clauses: clauses.to_vec(),
            risk_assessments: dimensions.to_vec(),
            compliance: Compliance {
                score: compliance_score(high, medium, low),
                high_risks: high,
                medium_risks: medium,
                low_risks: low,
            },
            business_impact: None,
        },
        improvement_suggestions,
    }
}

/// Derives persisted risk clauses from the dimension analysis.
#[must_use]
pub fn derive_risk_clauses(review_id: &str, dimensions: &[RiskDimension]) -> Vec<RiskClause> {
    dimensions
        .iter()
        .map(|dimension| RiskClause {
            id: None,
            review_id: review_id.to_string(),
            clause_text: dimension.risk_points.join("；"),
            risk_type: dimension.dimension_name.clone(),
            risk_level: dimension.level(),
            description: dimension.description.clone(),
            suggestion: dimension.improvements.join("；"),
            legal_basis: dimension.legal_basis.clone(),
            position_start: None,
            position_end: None,
        })
        .collect()
}

fn count_level(dimensions: &[RiskDimension], level: RiskLevel) -> usize {
    dimensions.iter().filter(|d| d.level() == level).count()
}
