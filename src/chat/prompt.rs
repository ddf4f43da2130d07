//! Prompt assembly for the chat orchestrator.
//!
//! Builds the final prompt from system instructions, an optional
//! retrieval context block, session history, and the current message,
//! trimming history from the oldest end to stay inside the token budget.

use crate::core::{ChatMessage, Role, estimate_tokens};
use crate::retrieval::ScoredSegment;
use std::fmt::Write;

/// System prompt for the legal assistant.
pub const SYSTEM_PROMPT: &str = "\
你是一名专业的中国法律智能助手。请基于提供的法律条文资料回答用户问题。

要求：
1. 回答必须以提供的资料为依据，引用条文时注明出处（法律名称和条号）。
2. 资料未覆盖的问题，明确说明依据不足，不要编造条文。
3. 使用准确的法律术语，条理清晰。
4. 不提供正式法律意见；提醒用户就具体案件咨询执业律师。";

/// Prompt used to rewrite a query before the second retrieval pass.
pub const QUERY_REWRITE_PROMPT: &str = "\
请将下面的用户问题改写为一条更适合法律条文检索的查询，保留法律名称和条文编号等关键信息。只返回改写后的查询，不要任何解释。

用户问题：";

/// Formats retrieval results into a context block with source tags.
#[must_use]
pub fn build_context_block(results: &[ScoredSegment], titles: &[String]) -> String {
    if results.is_empty() {
        return String::new();
    }
    let mut block = String::from("以下是检索到的相关法律条文：\n");
    for (i, result) in results.iter().enumerate() {
        let title = titles
            .get(i)
            .map_or("未知文档", String::as_str);
        let _ = writeln!(
            block,
            "{} {}",
            result.segment.source_tag(title),
            result.segment.text.trim()
        );
    }
    block
}

/// Heuristic for open-ended phrasing, used by UNIFIED routing.
#[must_use]
pub fn is_open_ended(message: &str) -> bool {
    const OPEN_MARKERS: &[&str] = &[
        "为什么", "怎么", "如何", "什么是", "是什么", "分析", "解释", "比较", "评价",
    ];
    OPEN_MARKERS.iter().any(|m| message.contains(m))
        || message.ends_with('？')
        || message.ends_with('?')
}

/// Assembles the full prompt within the token budget.
///
/// Sections in order: system prompt, context block (optional), history,
/// current message. When the estimate exceeds the budget, history is
/// dropped from the oldest end first; system, context, and the current
/// message are never dropped.
#[must_use]
pub fn assemble_prompt(
    context_block: &str,
    history: &[ChatMessage],
    current_message: &str,
    budget_tokens: usize,
) -> String {
    let fixed_cost = estimate_tokens(SYSTEM_PROMPT)
        + estimate_tokens(context_block)
        + estimate_tokens(current_message);

    // Walk history newest-to-oldest, keeping turns while they fit.
    let mut kept: Vec<&ChatMessage> = Vec::new();
    let mut used = fixed_cost;
    for message in history.iter().rev() {
        let cost = estimate_tokens(&message.content) + 4;
        if used + cost > budget_tokens {
            break;
        }
        used += cost;
        kept.push(message);
    }
    kept.reverse();

    let mut prompt = String::from(SYSTEM_PROMPT);
    prompt.push_str("\n\n");
    if !context_block.is_empty() {
        prompt.push_str(context_block);
        prompt.push('\n');
    }
    if !kept.is_empty() {
        prompt.push_str("对话历史：\n");
        for message in kept {
            let speaker = match message.role {
                Role::User => "用户",
                Role::Assistant => "助手",
            };
            let _ = writeln!(prompt, "{speaker}：{}", message.content);
        }
        prompt.push('\n');
    }
    let _ = write!(prompt, "用户：{current_message}\n助手：");
    prompt
}
