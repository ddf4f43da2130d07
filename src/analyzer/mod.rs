//! Structured analyzer: prompt → validated JSON.
//!
//! Model output is never trusted to be clean JSON. The analyzer strips
//! code fences and prose, extracts the outermost balanced object or array
//! with a string-aware brace counter, validates against the target
//! schema, and gives the model exactly one repair attempt before
//! surfacing `InvalidStructuredOutput`.

use crate::backend::{ChatBackend, GenerateOptions};
use crate::error::{AnalyzerError, Result};
use crate::runtime::{RetryConfig, retry};
use serde::de::DeserializeOwned;

/// Markers indicating refusal or meta-commentary instead of a result.
/// Matching output counts as invalid and triggers the repair attempt.
const QUALITY_MARKERS: &[&str] = &[
    "作为AI模型",
    "作为一个AI",
    "作为人工智能",
    "无法完成此任务",
    "抱歉，我无法",
    "I cannot fulfill",
    "As an AI",
];

/// A type the analyzer can extract from model output.
///
/// `validate` runs after deserialization; return a human-readable reason
/// on failure — it is fed back to the model in the repair prompt.
pub trait StructuredSchema: DeserializeOwned {
    /// Schema name for logs.
    fn schema_name() -> &'static str;

    /// Semantic validation beyond what serde enforces.
    ///
    /// # Errors
    ///
    /// Returns the validation failure reason.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Strips markdown code fences, keeping the fenced body.
#[must_use]
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json).
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Extracts the first outermost balanced `{...}` or `[...]` from possibly
/// noisy text. Brace counting is aware of JSON strings and escapes, so
/// braces inside string values do not confuse it.
#[must_use]
pub fn extract_balanced(s: &str) -> Option<&str> {
    let mut start: Option<usize> = None;
    let mut open_char = '{';
    let mut close_char = '}';
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s.char_indices() {
        if start.is_none() {
            if ch == '{' || ch == '[' {
                start = Some(i);
                open_char = ch;
                close_char = if ch == '{' { '}' } else { ']' };
                depth = 1;
                in_string = false;
                escaped = false;
            }
            continue;
        }

        if in_string {
            if escaped {
                escaped = false;
                continue;
            }
            match ch {
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            c if c == open_char => depth += 1,
            c if c == close_char => {
                depth -= 1;
                if depth == 0 {
                    let st = start?;
                    return Some(&s[st..=i + (ch.len_utf8() - 1)]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Extracts every top-level balanced JSON object/array in order. Used by
/// the SSE frame decoder, where multiple objects may share one `data:`
/// line.
#[must_use]
pub fn extract_all_balanced(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = s;
    let mut offset = 0;
    while let Some(payload) = extract_balanced(rest) {
        out.push(payload);
        // Advance past this payload within the original string.
        let start_in_rest = payload.as_ptr() as usize - rest.as_ptr() as usize;
        offset += start_in_rest + payload.len();
        rest = &s[offset..];
    }
    out
}

/// Checks model output for refusal markers and unfilled `{placeholder}`
/// template variables.
///
/// # Errors
///
/// Returns the matched marker as the failure reason.
pub fn quality_check(text: &str) -> std::result::Result<(), String> {
    use std::sync::LazyLock;

    for marker in QUALITY_MARKERS {
        if text.contains(marker) {
            return Err(format!("refusal marker {marker:?}"));
        }
    }

    // A bare identifier in braces is an unfilled template variable; real
    // JSON objects always carry quotes or colons between their braces.
    static PLACEHOLDER_RE: LazyLock<Option<regex::Regex>> =
        LazyLock::new(|| regex::Regex::new(r"\{[a-zA-Z_][a-zA-Z0-9_]*\}").ok());
    if let Some(re) = PLACEHOLDER_RE.as_ref()
        && let Some(found) = re.find(text)
    {
        return Err(format!("unfilled template placeholder {:?}", found.as_str()));
    }

    Ok(())
}

/// Parses and validates a schema value from raw model output.
///
/// # Errors
///
/// Returns a human-readable reason suitable for the repair prompt.
pub fn parse_structured<T: StructuredSchema>(raw: &str) -> std::result::Result<T, String> {
    quality_check(raw)?;
    let cleaned = strip_code_fences(raw);
    let payload = extract_balanced(cleaned).ok_or_else(|| "no JSON payload found".to_string())?;
    let value: T = serde_json::from_str(payload).map_err(|e| format!("JSON parse error: {e}"))?;
    value.validate()?;
    Ok(value)
}

/// Prompt→JSON extractor over a chat backend.
pub struct StructuredAnalyzer<'a> {
    backend: &'a dyn ChatBackend,
    retry_config: RetryConfig,
    opts: GenerateOptions,
}

impl<'a> StructuredAnalyzer<'a> {
    /// Creates an analyzer over the backend.
    #[must_use]
    pub fn new(backend: &'a dyn ChatBackend) -> Self {
        Self {
            backend,
            retry_config: RetryConfig::default(),
            opts: GenerateOptions::default(),
        }
    }

    /// Overrides the transient-retry configuration.
    #[must_use]
    pub const fn with_retry(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Overrides generation options.
    #[must_use]
    pub fn with_options(mut self, opts: GenerateOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Issues the prompt and extracts a validated `T`.
    ///
    /// Transient backend failures are retried. Invalid output gets one
    /// automatic repair re-prompt carrying the previous output and the
    /// failure reason; a second invalid output surfaces as
    /// [`AnalyzerError::InvalidOutput`] with the raw text attached for
    /// diagnostics (never shown to users).
    ///
    /// # Errors
    ///
    /// Returns backend errors and `InvalidStructuredOutput`.
    pub async fn extract<T: StructuredSchema>(&self, prompt: &str) -> Result<T> {
        let raw = self.generate(prompt).await?;
        let reason = match parse_structured::<T>(&raw) {
            Ok(value) => return Ok(value),
            Err(reason) => reason,
        };

        tracing::warn!(
            schema = T::schema_name(),
            reason = %reason,
            "structured output invalid; attempting repair"
        );

        let repair_prompt = format!(
            "{prompt}\n\n你上一次的输出无效：{reason}。只返回严格的JSON，不要任何其他文字。\n\n上一次的输出：\n{raw}"
        );
        let repaired = self.generate(&repair_prompt).await?;
        parse_structured::<T>(&repaired).map_err(|reason| {
            AnalyzerError::InvalidOutput {
                reason,
                raw: repaired,
            }
            .into()
        })
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let generation = retry(&self.retry_config, "structured-generate", || {
            self.backend.generate(prompt, &self.opts)
        })
        .await?;
        Ok(generation.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ScriptedBackend, ScriptedResponse};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Finding {
        name: String,
        level: String,
    }

    impl StructuredSchema for Finding {
        fn schema_name() -> &'static str {
            "finding"
        }

        fn validate(&self) -> std::result::Result<(), String> {
            if self.name.is_empty() {
                return Err("name must not be empty".to_string());
            }
            match self.level.as_str() {
                "LOW" | "MEDIUM" | "HIGH" => Ok(()),
                other => Err(format!("level must be LOW/MEDIUM/HIGH, got {other:?}")),
            }
        }
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1,2]\n```"), "[1,2]");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn test_extract_balanced_object() {
        let noisy = "好的，以下是分析结果：\n{\"name\": \"违约金\", \"level\": \"HIGH\"}\n希望对你有帮助。";
        let payload = extract_balanced(noisy).unwrap();
        assert_eq!(payload, "{\"name\": \"违约金\", \"level\": \"HIGH\"}");
    }

    #[test]
    fn test_extract_balanced_array() {
        let noisy = "result: [1, 2, {\"a\": 3}] trailing";
        assert_eq!(extract_balanced(noisy).unwrap(), "[1, 2, {\"a\": 3}]");
    }

    #[test]
    fn test_extract_balanced_nested_and_strings() {
        // Braces inside strings must not confuse the counter.
        let tricky = r#"{"text": "包含 } 和 { 的字符串", "inner": {"x": "\"quoted\""}}"#;
        assert_eq!(extract_balanced(tricky).unwrap(), tricky);
    }

    #[test]
    fn test_extract_balanced_escaped_quotes() {
        let tricky = r#"{"a": "escaped \" quote }"}"#;
        assert_eq!(extract_balanced(tricky).unwrap(), tricky);
    }

    #[test]
    fn test_extract_balanced_none() {
        assert_eq!(extract_balanced("no json here"), None);
        assert_eq!(extract_balanced("{unclosed"), None);
    }

    #[test]
    fn test_extract_all_balanced_multiple_objects() {
        let line = r#"{"type":"content","content":"a"}{"type":"complete"}"#;
        let payloads = extract_all_balanced(line);
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0], r#"{"type":"content","content":"a"}"#);
        assert_eq!(payloads[1], r#"{"type":"complete"}"#);
    }

    #[test]
    fn test_extract_all_balanced_with_separators() {
        let line = "x {\"a\":1} y [2] z";
        let payloads = extract_all_balanced(line);
        assert_eq!(payloads, vec!["{\"a\":1}", "[2]"]);
    }

    #[test]
    fn test_quality_check_refusals() {
        assert!(quality_check("作为AI模型，我无法提供法律意见").is_err());
        assert!(quality_check("无法完成此任务").is_err());
        assert!(quality_check("{\"ok\": true}").is_ok());
    }

    #[test]
    fn test_quality_check_placeholders() {
        assert!(quality_check("{\"desc\": \"参见{lawName}的规定\"}").is_err());
        // Ordinary JSON braces never look like placeholders.
        assert!(quality_check("{\"a\": {\"b\": 1}}").is_ok());
    }

    #[test]
    fn test_parse_structured_happy_path() {
        let raw = "```json\n{\"name\": \"付款条款\", \"level\": \"MEDIUM\"}\n```";
        let finding: Finding = parse_structured(raw).unwrap();
        assert_eq!(finding.name, "付款条款");
    }

    #[test]
    fn test_parse_structured_validation_failure() {
        let raw = "{\"name\": \"x\", \"level\": \"SEVERE\"}";
        let err = parse_structured::<Finding>(raw).unwrap_err();
        assert!(err.contains("SEVERE"));
    }

    #[tokio::test]
    async fn test_extract_first_try() {
        let backend = ScriptedBackend::with_responses([ScriptedResponse::Text(
            "{\"name\": \"合同期限\", \"level\": \"LOW\"}".to_string(),
        )]);
        let analyzer = StructuredAnalyzer::new(&backend);
        let finding: Finding = analyzer.extract("分析这个条款").await.unwrap();
        assert_eq!(finding.level, "LOW");
    }

    #[tokio::test]
    async fn test_extract_repair_succeeds() {
        let backend = ScriptedBackend::with_responses([
            ScriptedResponse::Text("抱歉，我无法直接给出JSON".to_string()),
            ScriptedResponse::Text("{\"name\": \"违约责任\", \"level\": \"HIGH\"}".to_string()),
        ]);
        let analyzer = StructuredAnalyzer::new(&backend);
        let finding: Finding = analyzer.extract("分析这个条款").await.unwrap();
        assert_eq!(finding.level, "HIGH");

        // The repair prompt carried the failure reason and the raw output.
        let prompts = backend.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("输出无效"));
        assert!(prompts[1].contains("抱歉，我无法直接给出JSON"));
    }

    #[tokio::test]
    async fn test_extract_second_failure_surfaces() {
        let backend = ScriptedBackend::with_responses([
            ScriptedResponse::Text("not json".to_string()),
            ScriptedResponse::Text("still not json".to_string()),
        ]);
        let analyzer = StructuredAnalyzer::new(&backend);
        let err = analyzer.extract::<Finding>("分析").await.unwrap_err();
        match err {
            crate::Error::Analyzer(AnalyzerError::InvalidOutput { raw, .. }) => {
                assert_eq!(raw, "still not json");
            }
            other => panic!("expected InvalidOutput, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_extract_retries_transient_backend_errors() {
        let backend = ScriptedBackend::with_responses([
            ScriptedResponse::TransientError("503".to_string()),
            ScriptedResponse::Text("{\"name\": \"a\", \"level\": \"LOW\"}".to_string()),
        ]);
        let analyzer = StructuredAnalyzer::new(&backend).with_retry(RetryConfig {
            initial_delay: std::time::Duration::from_millis(1),
            ..RetryConfig::default()
        });
        let finding: Finding = analyzer.extract("q").await.unwrap();
        assert_eq!(finding.name, "a");
    }
}
