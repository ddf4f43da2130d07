//! Hierarchy-aware legal document splitting.
//!
//! Turns a document's plain text into ordered, token-bounded [`Segment`]s.
//! Laws and regulations get a hierarchy pre-scan (`第…编/章/节` headings)
//! and article-level segmentation (`第…条`); everything else falls back to
//! boundary-aware paragraph splitting. Pure and deterministic: no I/O, no
//! clocks, same output for same input.

pub mod numerals;
pub mod recursive;

pub use numerals::{normalize_article_label, normalize_unit_label, parse_numeral, render_chinese};
pub use recursive::{RecursiveSplitter, find_char_boundary};

use crate::config::CoreConfig;
use crate::core::{DocCategory, Segment, SegmentMetadata, estimate_tokens};
use crate::error::{Result, SplitError};
use regex::Regex;

/// Pattern for the numeral body of a structural label.
const NUM: &str = "[0-9零一二三四五六七八九十百千万两]+";

/// Splitter configuration, derived from [`CoreConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SplitConfig {
    /// Target token budget per segment.
    pub max_tokens: usize,
    /// Overlap characters preserved at each sub-split cut.
    pub overlap: usize,
    /// Minimum trimmed segment length in characters (articles exempt).
    pub min_chunk_chars: usize,
}

impl From<&CoreConfig> for SplitConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            overlap: config.overlap,
            min_chunk_chars: config.min_chunk_chars,
        }
    }
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self::from(&CoreConfig::default())
    }
}

/// Hierarchy-aware legal splitter.
pub struct LegalSplitter {
    config: SplitConfig,
    article_re: Regex,
    book_re: Regex,
    chapter_re: Regex,
    section_re: Regex,
}

/// Running hierarchy context during the line scan. A newly recognized
/// higher level resets all lower levels.
#[derive(Debug, Default, Clone)]
struct Hierarchy {
    book: Option<String>,
    chapter: Option<String>,
    section: Option<String>,
}

/// An article collected during the scan, with the context it appeared in.
struct ArticleBlock {
    label: String,
    lines: Vec<String>,
    context: Hierarchy,
}

impl LegalSplitter {
    /// Creates a splitter with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SplitError::InvalidConfig`] for a zero token budget and
    /// [`SplitError::OverlapTooLarge`] when the overlap cannot fit the
    /// character budget.
    pub fn new(config: SplitConfig) -> Result<Self> {
        if config.max_tokens == 0 {
            return Err(SplitError::InvalidConfig {
                reason: "max_tokens must be > 0".to_string(),
            }
            .into());
        }
        // Overlap is counted in characters; one CJK character is roughly
        // one token under the estimator, so the token budget bounds it.
        if config.overlap >= config.max_tokens {
            return Err(SplitError::OverlapTooLarge {
                overlap: config.overlap,
                max: config.max_tokens,
            }
            .into());
        }

        Ok(Self {
            config,
            article_re: Regex::new(&format!("^\\s*(第{NUM}条)")).map_err(SplitError::from)?,
            book_re: Regex::new(&format!("^\\s*第{NUM}编(\\s|$)")).map_err(SplitError::from)?,
            chapter_re: Regex::new(&format!("^\\s*第{NUM}章(\\s|$)")).map_err(SplitError::from)?,
            section_re: Regex::new(&format!("^\\s*第{NUM}节(\\s|$)")).map_err(SplitError::from)?,
        })
    }

    /// Creates a splitter with the default configuration.
    ///
    /// # Errors
    ///
    /// Never fails for the default configuration; kept fallible for
    /// uniformity with [`Self::new`].
    pub fn with_defaults() -> Result<Self> {
        Self::new(SplitConfig::default())
    }

    /// Splits document text into ordered segments.
    ///
    /// # Errors
    ///
    /// Returns [`SplitError::EmptyText`] when `text` is empty after trim.
    pub fn split(
        &self,
        document_id: &str,
        text: &str,
        category: DocCategory,
        source_filename: Option<&str>,
    ) -> Result<Vec<Segment>> {
        if text.trim().is_empty() {
            return Err(SplitError::EmptyText.into());
        }

        let structured = category.is_structured_law() || self.looks_like_statute(text);

        let mut segments = if structured {
            let articles = self.scan_articles(text);
            if articles.is_empty() {
                self.split_paragraphs(document_id, text)
            } else {
                self.split_articles(document_id, &articles)
            }
        } else {
            self.split_paragraphs(document_id, text)
        };

        // Quality filter: drop fragments below the minimum length unless
        // they carry an article number, then re-number ordinals.
        let min_chars = self.config.min_chunk_chars;
        segments.retain(|s| s.is_article() || s.text.trim().chars().count() >= min_chars);
        for (ordinal, segment) in segments.iter_mut().enumerate() {
            segment.ordinal = ordinal;
            segment.metadata.category = Some(category.as_str().to_string());
            segment.metadata.source_filename = source_filename.map(ToString::to_string);
        }

        tracing::debug!(
            document_id,
            segments = segments.len(),
            structured,
            "split document"
        );

        Ok(segments)
    }

    /// Heuristic used when the category is not LAW/REGULATION: any line
    /// starting with an article marker makes the text statute-shaped.
    fn looks_like_statute(&self, text: &str) -> bool {
        text.lines().any(|line| self.article_re.is_match(line))
    }

    /// Line scan collecting articles with their hierarchy context.
    fn scan_articles(&self, text: &str) -> Vec<ArticleBlock> {
        let mut articles: Vec<ArticleBlock> = Vec::new();
        let mut context = Hierarchy::default();
        let mut current: Option<ArticleBlock> = None;

        for line in text.lines() {
            if let Some(caps) = self.article_re.captures(line) {
                if let Some(block) = current.take() {
                    articles.push(block);
                }
                let raw_label = caps.get(1).map_or("", |m| m.as_str());
                let label = normalize_article_label(raw_label)
                    .unwrap_or_else(|| raw_label.to_string());
                current = Some(ArticleBlock {
                    label,
                    lines: vec![line.to_string()],
                    context: context.clone(),
                });
                continue;
            }

            if let Some(heading) = self.classify_heading(line) {
                if let Some(block) = current.take() {
                    articles.push(block);
                }
                match heading {
                    HeadingLevel::Book => {
                        context.book = Some(line.trim().to_string());
                        context.chapter = None;
                        context.section = None;
                    }
                    HeadingLevel::Chapter => {
                        context.chapter = Some(line.trim().to_string());
                        context.section = None;
                    }
                    HeadingLevel::Section => {
                        context.section = Some(line.trim().to_string());
                    }
                }
                continue;
            }

            if let Some(block) = current.as_mut() {
                block.lines.push(line.to_string());
            }
        }

        if let Some(block) = current.take() {
            articles.push(block);
        }

        articles
    }

    /// Classifies a heading line, highest level first. Heading lines are
    /// short; long lines that merely start with a label are body text.
    fn classify_heading(&self, line: &str) -> Option<HeadingLevel> {
        if line.trim().chars().count() > 40 {
            return None;
        }
        if self.book_re.is_match(line) {
            return Some(HeadingLevel::Book);
        }
        if self.chapter_re.is_match(line) {
            return Some(HeadingLevel::Chapter);
        }
        if self.section_re.is_match(line) {
            return Some(HeadingLevel::Section);
        }
        None
    }

    /// Builds segments from collected articles, sub-splitting over-long
    /// ones at paragraph/sentence boundaries with overlap.
    fn split_articles(&self, document_id: &str, articles: &[ArticleBlock]) -> Vec<Segment> {
        let mut segments = Vec::new();

        for article in articles {
            let text = article.lines.join("\n").trim().to_string();
            let base_meta = SegmentMetadata {
                book: article.context.book.clone(),
                chapter: article.context.chapter.clone(),
                section: article.context.section.clone(),
                article_number: Some(article.label.clone()),
                ..SegmentMetadata::default()
            };

            if estimate_tokens(&text) <= self.config.max_tokens {
                let metadata = SegmentMetadata {
                    split_type: Some("article".to_string()),
                    ..base_meta
                };
                segments.push(Segment::new(document_id, segments.len(), text, metadata));
                continue;
            }

            // Over-long article: cut at natural boundaries, then carry
            // `overlap` characters of context across each cut.
            let splitter = RecursiveSplitter::new(self.config.max_tokens * 3);
            let pieces = splitter.split(&text);
            let total_parts = pieces.len();

            for (i, piece) in pieces.iter().enumerate() {
                let content = if i == 0 {
                    (*piece).to_string()
                } else {
                    let mut combined = self.overlap_tail(pieces[i - 1], piece.len());
                    combined.push_str(piece);
                    combined
                };
                let metadata = SegmentMetadata {
                    part: Some(i + 1),
                    total_parts: Some(total_parts),
                    split_type: Some("article_part".to_string()),
                    ..base_meta.clone()
                };
                segments.push(Segment::new(document_id, segments.len(), content, metadata));
            }
        }

        segments
    }

    /// Last `overlap` characters of the previous piece, trimmed so the
    /// combined part stays inside the 1.2x token bound.
    fn overlap_tail(&self, previous: &str, piece_len: usize) -> String {
        if self.config.overlap == 0 {
            return String::new();
        }
        let tail_start = previous
            .char_indices()
            .rev()
            .nth(self.config.overlap - 1)
            .map_or(0, |(idx, _)| idx);
        let mut tail = &previous[tail_start..];

        // The combined part may not exceed the 1.2x token bound.
        let max_total = (self.config.max_tokens * 12 / 10) * 3;
        while piece_len + tail.len() > max_total && !tail.is_empty() {
            let step = tail.chars().next().map_or(1, char::len_utf8);
            tail = &tail[step..];
        }
        tail.to_string()
    }

    /// Paragraph fallback for unstructured documents.
    fn split_paragraphs(&self, document_id: &str, text: &str) -> Vec<Segment> {
        let splitter = RecursiveSplitter::new(self.config.max_tokens * 3);
        splitter
            .split(text)
            .into_iter()
            .enumerate()
            .map(|(i, piece)| {
                let metadata = SegmentMetadata {
                    split_type: Some("paragraph".to_string()),
                    ..SegmentMetadata::default()
                };
                Segment::new(document_id, i, piece.trim().to_string(), metadata)
            })
            .collect()
    }
}

/// Heading levels recognized during the pre-scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadingLevel {
    Book,
    Chapter,
    Section,
}
