//! Report rendering port.
//!
//! Turning the report model into a polished PDF belongs to an external
//! collaborator; the in-tree [`MinimalPdfRenderer`] emits a small but
//! well-formed single-page PDF with the headline numbers, enough for
//! download endpoints and tests.

use crate::error::Result;
use std::fmt::Write as _;

/// Port for report rendering.
pub trait ReportRenderer: Send + Sync {
    /// Renders the report model to PDF bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when the model cannot be rendered.
    fn render(&self, report: &serde_json::Value) -> Result<Vec<u8>>;
}

/// Minimal single-page PDF renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimalPdfRenderer;

impl MinimalPdfRenderer {
    /// Creates a renderer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Pulls the headline lines out of the report model.
    fn headline_lines(report: &serde_json::Value) -> Vec<String> {
        let mut lines = vec!["Contract Review Report".to_string()];
        if let Some(level) = report
            .pointer("/executiveSummary/riskLevel")
            .and_then(serde_json::Value::as_str)
        {
            lines.push(format!("Overall risk level: {level}"));
        }
        if let Some(score) = report
            .pointer("/deepAnalysis/compliance/score")
            .and_then(serde_json::Value::as_u64)
        {
            lines.push(format!("Compliance score: {score}"));
        }
        let risks = report
            .pointer("/deepAnalysis/riskAssessments")
            .and_then(serde_json::Value::as_array)
            .map_or(0, Vec::len);
        lines.push(format!("Risk findings: {risks}"));
        lines
    }
}

/// Escapes a string for a PDF literal.
fn escape_pdf(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

impl ReportRenderer for MinimalPdfRenderer {
    fn render(&self, report: &serde_json::Value) -> Result<Vec<u8>> {
        let lines = Self::headline_lines(report);

        let mut content = String::from("BT /F1 14 Tf 72 720 Td 18 TL\n");
        for line in &lines {
            let _ = writeln!(content, "({}) '", escape_pdf(line));
        }
        content.push_str("ET\n");

        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 4 0 R >> >> /Contents 5 0 R >>"
                .to_string(),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
            format!("<< /Length {} >>\nstream\n{content}endstream", content.len()),
        ];

        let mut pdf = String::from("%PDF-1.4\n");
        let mut offsets = Vec::with_capacity(objects.len());
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            let _ = write!(pdf, "{} 0 obj\n{body}\nendobj\n", i + 1);
        }

        let xref_offset = pdf.len();
        let _ = write!(pdf, "xref\n0 {}\n", objects.len() + 1);
        pdf.push_str("0000000000 65535 f \n");
        for offset in offsets {
            let _ = writeln!(pdf, "{offset:010} 00000 n ");
        }
        let _ = write!(
            pdf,
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            objects.len() + 1
        );

        Ok(pdf.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> serde_json::Value {
        serde_json::json!({
            "executiveSummary": {"riskLevel": "HIGH"},
            "deepAnalysis": {
                "compliance": {"score": 78},
                "riskAssessments": [{"dimensionName": "付款条款"}]
            }
        })
    }

    #[test]
    fn test_render_starts_with_pdf_magic() {
        let renderer = MinimalPdfRenderer::new();
        let bytes = renderer.render(&sample_report()).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(!bytes.is_empty());
    }

    #[test]
    fn test_render_contains_headline_data() {
        let renderer = MinimalPdfRenderer::new();
        let bytes = renderer.render(&sample_report()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Overall risk level: HIGH"));
        assert!(text.contains("Compliance score: 78"));
        assert!(text.contains("Risk findings: 1"));
        assert!(text.ends_with("%%EOF\n"));
    }

    #[test]
    fn test_render_tolerates_sparse_model() {
        let renderer = MinimalPdfRenderer::new();
        let bytes = renderer.render(&serde_json::json!({})).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_escape_pdf() {
        assert_eq!(escape_pdf("a(b)c\\d"), "a\\(b\\)c\\\\d");
    }
}
