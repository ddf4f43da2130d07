//! Document representation.
//!
//! A document is one ingested source (a statute, regulation, judgment, or
//! contract template). Its identity derives from the sha-256 hash of its
//! bytes, which makes re-uploads of identical content a natural no-op.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::now_ts;

/// Category of an ingested legal document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocCategory {
    /// Statute text (laws passed by the legislature).
    Law,
    /// Administrative regulations.
    Regulation,
    /// Court decisions.
    Case,
    /// Contract templates.
    ContractTemplate,
    /// Anything else.
    General,
}

impl DocCategory {
    /// Whether documents of this category get the hierarchy pre-scan.
    #[must_use]
    pub const fn is_structured_law(self) -> bool {
        matches!(self, Self::Law | Self::Regulation)
    }

    /// Stable string form used in storage and segment metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Law => "LAW",
            Self::Regulation => "REGULATION",
            Self::Case => "CASE",
            Self::ContractTemplate => "CONTRACT_TEMPLATE",
            Self::General => "GENERAL",
        }
    }

    /// Parses the stable string form; unknown values map to `General`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "LAW" => Self::Law,
            "REGULATION" => Self::Regulation,
            "CASE" => Self::Case,
            "CONTRACT_TEMPLATE" => Self::ContractTemplate,
            _ => Self::General,
        }
    }
}

/// An ingested document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable id derived from the content hash (`doc-<hash16>`).
    pub id: String,

    /// Display title (usually the source filename).
    pub title: String,

    /// MIME type the bytes arrived with.
    pub mime_type: String,

    /// Document category.
    pub category: DocCategory,

    /// Full sha-256 hex of the source bytes. Unique per logical source.
    pub content_hash: String,

    /// Number of segments produced at ingest (set by the coordinator).
    pub segment_count: usize,

    /// Unix timestamp when the document was created.
    pub created_at: i64,

    /// Unix timestamp when the document was last updated.
    pub updated_at: i64,

    /// Opaque metadata. The coordinator records `partially_indexed` here
    /// when an embedding batch dead-letters.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    /// Creates a new document record for the given content hash.
    #[must_use]
    pub fn new(title: &str, mime_type: &str, category: DocCategory, hash: &str) -> Self {
        let now = now_ts();
        Self {
            id: document_id_for_hash(hash),
            title: title.to_string(),
            mime_type: mime_type.to_string(),
            category,
            content_hash: hash.to_string(),
            segment_count: 0,
            created_at: now,
            updated_at: now,
            metadata: serde_json::Map::new(),
        }
    }

    /// Marks the document as only partially indexed.
    pub fn mark_partially_indexed(&mut self) {
        self.metadata
            .insert("partially_indexed".to_string(), serde_json::Value::Bool(true));
        self.updated_at = now_ts();
    }

    /// Whether some embedding batches dead-lettered during ingest.
    #[must_use]
    pub fn is_partially_indexed(&self) -> bool {
        self.metadata
            .get("partially_indexed")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Computes the sha-256 hex digest of document bytes.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Derives the stable document id from a content hash.
///
/// Uses the first 16 hex characters, prefixed for readability.
#[must_use]
pub fn document_id_for_hash(hash: &str) -> String {
    let short = hash.get(..16).unwrap_or(hash);
    format!("doc-{short}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_sha256_hex() {
        let hash = content_hash(b"hello");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_content_hash_deterministic() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }

    #[test]
    fn test_document_id_for_hash() {
        let hash = content_hash(b"hello");
        let id = document_id_for_hash(&hash);
        assert_eq!(id, "doc-2cf24dba5fb0a30e");
    }

    #[test]
    fn test_document_id_short_hash() {
        assert_eq!(document_id_for_hash("abcd"), "doc-abcd");
    }

    #[test]
    fn test_document_new() {
        let hash = content_hash(b"some statute text");
        let doc = Document::new("minfa.txt", "text/plain", DocCategory::Law, &hash);
        assert_eq!(doc.content_hash, hash);
        assert!(doc.id.starts_with("doc-"));
        assert_eq!(doc.segment_count, 0);
        assert!(!doc.is_partially_indexed());
        assert_eq!(doc.created_at, doc.updated_at);
    }

    #[test]
    fn test_partially_indexed_flag() {
        let mut doc = Document::new("x", "text/plain", DocCategory::General, "ff");
        doc.mark_partially_indexed();
        assert!(doc.is_partially_indexed());
    }

    #[test]
    fn test_category_structured_law() {
        assert!(DocCategory::Law.is_structured_law());
        assert!(DocCategory::Regulation.is_structured_law());
        assert!(!DocCategory::Case.is_structured_law());
        assert!(!DocCategory::ContractTemplate.is_structured_law());
        assert!(!DocCategory::General.is_structured_law());
    }

    #[test]
    fn test_category_round_trip() {
        for cat in [
            DocCategory::Law,
            DocCategory::Regulation,
            DocCategory::Case,
            DocCategory::ContractTemplate,
            DocCategory::General,
        ] {
            assert_eq!(DocCategory::parse(cat.as_str()), cat);
        }
        assert_eq!(DocCategory::parse("whatever"), DocCategory::General);
    }

    #[test]
    fn test_document_serialization() {
        let doc = Document::new("t", "text/plain", DocCategory::Law, "aa");
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("\"LAW\""));
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }
}
