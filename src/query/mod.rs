//! Query analysis.
//!
//! Parses a user query into a [`QueryIntent`]: which law it names, which
//! article/chapter/section it points at, and how precise the query is.
//! Pure function of the query text; the hybrid retriever branches on the
//! result.

use crate::error::{Result, SplitError};
use crate::split::numerals::{normalize_article_label, normalize_unit_label};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How precise a query is, driving retrieval branch selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    /// Names a specific article; exact metadata lookup applies.
    PreciseArticle,
    /// Names a chapter but no article.
    ChapterLevel,
    /// Free-form semantic query.
    Semantic,
    /// Reserved for queries naming several distinct law+article pairs.
    /// The analyzer currently records only the first mention and returns
    /// `PreciseArticle`; nothing produces this variant yet. The retriever
    /// treats it as `Semantic` if one is ever constructed by hand.
    Complex,
}

/// Parsed description of what a query asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryIntent {
    /// The query as received.
    pub original_query: String,
    /// Law short name, `《》` and the state prefix stripped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub law_name: Option<String>,
    /// Normalized article label (`第三十条`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_number: Option<String>,
    /// Normalized chapter label (`第二章`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    /// Normalized section label (`第一节`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Query classification.
    pub query_type: QueryType,
}

impl QueryIntent {
    /// Whether the query deserves a precise (metadata-first) retrieval path.
    #[must_use]
    pub const fn is_precise_query(&self) -> bool {
        matches!(
            self.query_type,
            QueryType::PreciseArticle | QueryType::ChapterLevel
        )
    }

    /// Whether exact-match lookup has everything it needs.
    #[must_use]
    pub const fn has_exact_match_info(&self) -> bool {
        self.law_name.is_some() && self.article_number.is_some()
    }
}

/// The numeral body accepted inside structural labels.
const NUM: &str = "[0-9零一二三四五六七八九十百千万两]+";

/// Query analyzer with precompiled patterns.
pub struct QueryAnalyzer {
    quoted_law_re: Regex,
    bare_law_re: Regex,
    article_re: Regex,
    chapter_re: Regex,
    section_re: Regex,
}

impl QueryAnalyzer {
    /// Creates an analyzer.
    ///
    /// # Errors
    ///
    /// Returns an error only if a pattern fails to compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            quoted_law_re: Regex::new("《([^》]+)》").map_err(SplitError::from)?,
            // A CJK run ending in a law-name suffix. 第 and 条 are kept out
            // of the run body so the name stops before `第…条` markers while
            // 条例 still matches through the suffix alternation.
            bare_law_re: Regex::new(
                "([\\p{Han}--[第条]]{1,20}(?:法典|法|条例|规定|办法|解释|细则))",
            )
            .map_err(SplitError::from)?,
            article_re: Regex::new(&format!("(第{NUM}条)")).map_err(SplitError::from)?,
            chapter_re: Regex::new(&format!("(第{NUM}章)")).map_err(SplitError::from)?,
            section_re: Regex::new(&format!("(第{NUM}节)")).map_err(SplitError::from)?,
        })
    }

    /// Parses the query into a [`QueryIntent`]. Pure and deterministic.
    #[must_use]
    pub fn analyze(&self, query: &str) -> QueryIntent {
        let law_name = self.extract_law_name(query);
        let article_number = self
            .article_re
            .captures(query)
            .and_then(|c| c.get(1))
            .and_then(|m| normalize_article_label(m.as_str()));
        let chapter = self
            .chapter_re
            .captures(query)
            .and_then(|c| c.get(1))
            .and_then(|m| normalize_unit_label(m.as_str(), '章'));
        let section = self
            .section_re
            .captures(query)
            .and_then(|c| c.get(1))
            .and_then(|m| normalize_unit_label(m.as_str(), '节'));

        let query_type = if article_number.is_some() {
            QueryType::PreciseArticle
        } else if chapter.is_some() {
            QueryType::ChapterLevel
        } else {
            QueryType::Semantic
        };

        QueryIntent {
            original_query: query.to_string(),
            law_name,
            article_number,
            chapter,
            section,
            query_type,
        }
    }

    /// Extracts the law short name. `《》` quoting wins; otherwise the first
    /// suffix-shaped CJK run. The `中华人民共和国` prefix and common leading
    /// particles are dropped either way.
    fn extract_law_name(&self, query: &str) -> Option<String> {
        let raw = self
            .quoted_law_re
            .captures(query)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .or_else(|| {
                self.bare_law_re
                    .captures(query)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
            })?;

        let mut name = raw.trim();
        loop {
            let before = name;
            name = name.strip_prefix("中华人民共和国").unwrap_or(name);
            for particle in ["根据", "依据", "按照", "请问", "关于", "查询", "对于"] {
                name = name.strip_prefix(particle).unwrap_or(name);
            }
            if name == before {
                break;
            }
        }
        (!name.is_empty()).then(|| name.to_string())
    }
}
