//! Analytic prompts for contract review.
//!
//! Two prompts run in parallel during the ANALYZING stage: risk
//! dimensions and key clauses. Both demand strict JSON and go through the
//! structured analyzer, so their output types implement
//! [`StructuredSchema`] with semantic validation.

use crate::analyzer::StructuredSchema;
use crate::core::RiskLevel;
use serde::{Deserialize, Serialize};

/// System-style preamble for the risk-dimension analysis.
const RISK_DIMENSIONS_PROMPT: &str = r#"你是一位资深合同审查律师，拥有十年以上的合同风险审查经验。请从以下维度逐项审查合同：主体资格、付款条款、违约责任、知识产权、保密条款、争议解决、合同解除、不可抗力。

要求：
1. 只审查合同中实际存在依据的问题，不要臆造。
2. 每个维度给出风险等级：高 / 中 / 低。
3. 引用法律依据时给出法律名称和条号，不要编造条文。
4. 改进建议必须具体可执行，不要写"建议完善"之类的空话。

## 输出格式

只返回严格的JSON数组，每个维度一个对象，不要任何其他文字：

[
  {
    "dimensionName": "付款条款",
    "riskLevel": "高",
    "riskPoints": ["未约定付款期限", "未约定逾期利息"],
    "description": "付款安排缺少时间约束，回款风险高。",
    "legalBasis": "民法典第五百一十一条",
    "improvements": ["补充明确的付款期限条款", "约定逾期付款的利息计算方式"]
  }
]

没有风险的维度不要输出。

## 待审查合同

"#;

/// System-style preamble for the key-clause analysis.
const KEY_CLAUSES_PROMPT: &str = r#"你是一位资深合同审查律师。请找出合同中的关键条款并逐条分析其完整性。

要求：
1. 关键条款包括：标的、价款、履行期限、验收、违约责任、争议解决等。
2. content 字段引用合同原文，不要改写。
3. isComplete 表示该条款要素是否齐备。
4. 缺失的关键条款也要列出，content 留空字符串，isComplete 为 false。

## 输出格式

只返回严格的JSON数组，不要任何其他文字：

[
  {
    "title": "价款与支付",
    "content": "合同原文片段",
    "analysis": "对该条款的分析",
    "importance": "高",
    "isComplete": true,
    "suggestion": "具体修改建议"
  }
]

## 待审查合同

"#;

/// Builds the risk-dimension prompt for a contract.
#[must_use]
pub fn build_risk_prompt(contract_text: &str) -> String {
    format!("{RISK_DIMENSIONS_PROMPT}{contract_text}")
}

/// Builds the key-clause prompt for a contract.
#[must_use]
pub fn build_clause_prompt(contract_text: &str) -> String {
    format!("{KEY_CLAUSES_PROMPT}{contract_text}")
}

/// One analyzed risk dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskDimension {
    /// Dimension name (付款条款, 违约责任, ...).
    pub dimension_name: String,
    /// Risk label as emitted by the model (高/中/低).
    pub risk_level: String,
    /// Concrete risk points found.
    #[serde(default)]
    pub risk_points: Vec<String>,
    /// What the risk is.
    pub description: String,
    /// Statutory basis, when cited.
    #[serde(default)]
    pub legal_basis: Option<String>,
    /// Concrete improvement actions.
    #[serde(default)]
    pub improvements: Vec<String>,
}

impl RiskDimension {
    /// Parses the model's risk label.
    #[must_use]
    pub fn level(&self) -> RiskLevel {
        RiskLevel::parse(&self.risk_level).unwrap_or(RiskLevel::Low)
    }
}

/// The risk-dimension analysis result (a JSON array).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiskDimensions(pub Vec<RiskDimension>);

impl StructuredSchema for RiskDimensions {
    fn schema_name() -> &'static str {
        "risk-dimensions"
    }

    fn validate(&self) -> std::result::Result<(), String> {
        for dimension in &self.0 {
            if dimension.dimension_name.trim().is_empty() {
                return Err("dimensionName must not be empty".to_string());
            }
            if RiskLevel::parse(&dimension.risk_level).is_none() {
                return Err(format!(
                    "riskLevel must be 高/中/低, got {:?}",
                    dimension.risk_level
                ));
            }
            if dimension.description.trim().is_empty() {
                return Err("description must not be empty".to_string());
            }
        }
        Ok(())
    }
}

/// One analyzed key clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyClause {
    /// Clause title (价款与支付, ...).
    pub title: String,
    /// Original clause text; empty when the clause is missing.
    #[serde(default)]
    pub content: String,
    /// Analysis of the clause.
    pub analysis: String,
    /// Importance label (高/中/低).
    pub importance: String,
    /// Whether the clause's essential elements are present.
    pub is_complete: bool,
    /// Suggested modification.
    #[serde(default)]
    pub suggestion: String,
}

/// The key-clause analysis result (a JSON array).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyClauses(pub Vec<KeyClause>);

impl StructuredSchema for KeyClauses {
    fn schema_name() -> &'static str {
        "key-clauses"
    }

    fn validate(&self) -> std::result::Result<(), String> {
        for clause in &self.0 {
            if clause.title.trim().is_empty() {
                return Err("title must not be empty".to_string());
            }
            if clause.analysis.trim().is_empty() {
                return Err("analysis must not be empty".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::parse_structured;

    #[test]
    fn test_prompts_carry_contract_text() {
        let prompt = build_risk_prompt("合同正文");
        assert!(prompt.contains("合同正文"));
        assert!(prompt.contains("严格的JSON"));

        let prompt = build_clause_prompt("合同正文");
        assert!(prompt.ends_with("合同正文"));
    }

    #[test]
    fn test_risk_dimensions_parse_from_model_output() {
        let raw = r#"```json
[
  {
    "dimensionName": "违约责任",
    "riskLevel": "高",
    "riskPoints": ["违约金过高"],
    "description": "违约金为合同总额的50%，显著过高。",
    "legalBasis": "民法典第五百八十五条",
    "improvements": ["将违约金调整至损失的30%以内"]
  }
]
```"#;
        let dimensions: RiskDimensions = parse_structured(raw).unwrap();
        assert_eq!(dimensions.0.len(), 1);
        assert_eq!(dimensions.0[0].level(), crate::core::RiskLevel::High);
    }

    #[test]
    fn test_risk_dimensions_validation_rejects_bad_level() {
        let raw = r#"[{"dimensionName": "a", "riskLevel": "极高", "description": "x"}]"#;
        assert!(parse_structured::<RiskDimensions>(raw).is_err());
    }

    #[test]
    fn test_risk_dimensions_empty_array_valid() {
        let dimensions: RiskDimensions = parse_structured("[]").unwrap();
        assert!(dimensions.0.is_empty());
    }

    #[test]
    fn test_key_clauses_parse() {
        let raw = r#"[
  {
    "title": "价款与支付",
    "content": "第三条 合同总价为人民币十万元。",
    "analysis": "价款明确但缺少支付期限。",
    "importance": "高",
    "isComplete": false,
    "suggestion": "补充付款期限与方式"
  }
]"#;
        let clauses: KeyClauses = parse_structured(raw).unwrap();
        assert_eq!(clauses.0.len(), 1);
        assert!(!clauses.0[0].is_complete);
    }

    #[test]
    fn test_key_clauses_validation() {
        let raw = r#"[{"title": "", "analysis": "x", "importance": "高", "isComplete": true}]"#;
        assert!(parse_structured::<KeyClauses>(raw).is_err());
    }
}
