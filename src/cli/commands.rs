//! Command execution.
//!
//! Each command assembles [`CoreServices`] against the configured
//! database, runs one operation, and returns the formatted output.

use super::output::{OutputFormat, to_json};
use super::parser::{Cli, Commands, SessionAction};
use crate::chat::{ChatRequest, ModelType};
use crate::config::CoreConfig;
use crate::core::DocCategory;
use crate::error::{Error, Result};
use crate::service::CoreServices;
use std::fmt::Write as _;
use std::path::Path;

/// Executes the parsed command, returning the output to print.
///
/// # Errors
///
/// Returns any core error; the binary maps it through the error envelope.
pub async fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);
    let services = CoreServices::open(CoreConfig::default(), &cli.db)?;

    match &cli.command {
        Commands::Init => {
            // Assembly already ran init; just confirm.
            Ok(match format {
                OutputFormat::Json => to_json(&serde_json::json!({"initialized": true})),
                OutputFormat::Text => format!("initialized {}\n", cli.db.display()),
            })
        }

        Commands::Ingest { path, category } => {
            let bytes = read_file(path)?;
            let filename = file_name(path);
            let outcome = services
                .ingestion
                .ingest_document(&bytes, mime_for(path), DocCategory::parse(category), &filename)
                .await?;
            Ok(match format {
                OutputFormat::Json => to_json(&outcome),
                OutputFormat::Text => {
                    let mut out = format!(
                        "{} {}: {} segments, {} embedded\n",
                        if outcome.deduplicated { "exists" } else { "ingested" },
                        outcome.document_id,
                        outcome.segments,
                        outcome.embedded,
                    );
                    for warning in &outcome.warnings {
                        let _ = writeln!(out, "warning: {warning}");
                    }
                    out
                }
            })
        }

        Commands::Search { query, k } => {
            let results = services.search(query, *k).await?;
            Ok(match format {
                OutputFormat::Json => to_json(&results),
                OutputFormat::Text => {
                    let mut out = String::new();
                    for (rank, result) in results.iter().enumerate() {
                        let article = result
                            .segment
                            .metadata
                            .article_number
                            .as_deref()
                            .unwrap_or("-");
                        let _ = writeln!(
                            out,
                            "{}. [{:.3}] {} {}",
                            rank + 1,
                            result.score,
                            article,
                            preview(&result.segment.text, 80),
                        );
                    }
                    if out.is_empty() {
                        out.push_str("no results\n");
                    }
                    out
                }
            })
        }

        Commands::Ask {
            message,
            conversation,
            no_rag,
        } => {
            let response = services
                .chat
                .chat(&ChatRequest {
                    message: message.clone(),
                    conversation_id: conversation.clone(),
                    use_knowledge_base: !no_rag,
                    model_type: ModelType::Basic,
                    ..ChatRequest::default()
                })
                .await?;
            Ok(match format {
                OutputFormat::Json => to_json(&response),
                OutputFormat::Text => {
                    let mut out = format!("{}\n", response.content);
                    if !response.sources.is_empty() {
                        out.push_str("\nsources:\n");
                        for source in &response.sources {
                            let _ = writeln!(
                                out,
                                "  - {} {}",
                                source.title,
                                source.article_number.as_deref().unwrap_or("")
                            );
                        }
                    }
                    let _ = writeln!(out, "\nconversation: {}", response.conversation_id);
                    out
                }
            })
        }

        Commands::Sessions { action } => execute_sessions(&services, action, format).await,

        Commands::Review { path, output } => {
            let bytes = read_file(path)?;
            let filename = file_name(path);
            let ticket = services
                .review
                .submit("local", &filename, mime_for(path), bytes)
                .await?;

            let mut out = format!("review {} submitted\n", ticket.review_id);
            let (last, mut rx) = services.review.subscribe(&ticket.review_id);
            let mut events: Vec<_> = last.into_iter().collect();
            if !events.last().is_some_and(|e| e.completed) {
                while let Ok(event) = rx.recv().await {
                    let terminal = event.completed;
                    events.push(event);
                    if terminal {
                        break;
                    }
                }
            }
            for event in &events {
                let _ = writeln!(out, "  {:>3}% {} {}", event.progress, event.stage, event.message);
                if let Some(error) = &event.error {
                    let _ = writeln!(out, "       error: {error}");
                }
            }

            let review = services.review.get_review(&ticket.review_id).await?;
            if review.status == crate::core::ReviewStatus::Completed {
                let pdf = services.review.report_pdf(&ticket.review_id).await?;
                let target = output.clone().unwrap_or_else(|| path.with_extension("report.pdf"));
                std::fs::write(&target, pdf)
                    .map_err(|e| Error::internal("failed to write report", &e))?;
                let _ = writeln!(out, "report written to {}", target.display());
            }

            Ok(match format {
                OutputFormat::Json => to_json(&serde_json::json!({
                    "reviewId": ticket.review_id,
                    "status": review.status,
                    "riskLevel": review.risk_level,
                    "totalRisks": review.total_risks,
                })),
                OutputFormat::Text => out,
            })
        }

        Commands::Delete { document_id } => {
            services.ingestion.delete_document(document_id).await?;
            Ok(match format {
                OutputFormat::Json => to_json(&serde_json::json!({"deleted": document_id})),
                OutputFormat::Text => format!("deleted {document_id}\n"),
            })
        }

        Commands::Stats => {
            let stats = services.ingestion.stats().await?;
            Ok(match format {
                OutputFormat::Json => to_json(&stats),
                OutputFormat::Text => {
                    let mut out = format!(
                        "documents: {}\nsegments: {}\nembeddings: {}\nsessions: {}\nreviews: {}\n",
                        stats.documents,
                        stats.segments,
                        stats.embeddings,
                        stats.sessions,
                        stats.reviews,
                    );
                    let mut categories: Vec<_> = stats.by_category.iter().collect();
                    categories.sort();
                    for (category, count) in categories {
                        let _ = writeln!(out, "  {category}: {count}");
                    }
                    out
                }
            })
        }

        Commands::DeadLetters => {
            let letters = {
                let store = services.store.lock().await;
                store.list_dead_letters()?
            };
            Ok(match format {
                OutputFormat::Json => to_json(&letters),
                OutputFormat::Text => {
                    if letters.is_empty() {
                        "no dead letters\n".to_string()
                    } else {
                        let mut out = String::new();
                        for letter in &letters {
                            let _ = writeln!(
                                out,
                                "{} batch {}: {}",
                                letter.document_id, letter.batch_index, letter.reason
                            );
                        }
                        out
                    }
                }
            })
        }
    }
}

async fn execute_sessions(
    services: &CoreServices,
    action: &SessionAction,
    format: OutputFormat,
) -> Result<String> {
    match action {
        SessionAction::List => {
            let sessions = services.chat.list_sessions("local").await?;
            Ok(match format {
                OutputFormat::Json => to_json(&sessions),
                OutputFormat::Text => {
                    let mut out = String::new();
                    for session in &sessions {
                        let _ = writeln!(out, "{}  {}", session.id, session.title);
                    }
                    if out.is_empty() {
                        out.push_str("no sessions\n");
                    }
                    out
                }
            })
        }
        SessionAction::Show { id } => {
            let (session, messages) = services.chat.get_session(id).await?;
            Ok(match format {
                OutputFormat::Json => to_json(&serde_json::json!({
                    "session": session,
                    "messages": messages,
                })),
                OutputFormat::Text => {
                    let mut out = format!("{}  {}\n\n", session.id, session.title);
                    for message in &messages {
                        let _ = writeln!(
                            out,
                            "[{}] {}: {}",
                            message.seq,
                            message.role.as_str(),
                            message.content
                        );
                    }
                    out
                }
            })
        }
        SessionAction::Delete { id } => {
            services.chat.delete_session(id).await?;
            Ok(match format {
                OutputFormat::Json => to_json(&serde_json::json!({"deleted": id})),
                OutputFormat::Text => format!("deleted {id}\n"),
            })
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::InvalidInput {
        message: format!("cannot read {}: {e}", path.display()),
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string()
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("md") => "text/markdown",
        Some("json") => "application/json",
        _ => "text/plain",
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out.replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    fn cli_for(dir: &Path, args: &[&str]) -> Cli {
        let db = dir.join("test.db");
        let mut full = vec!["lexrag", "--db"];
        let db_str = db.to_str().unwrap().to_string();
        let db_leaked: &str = Box::leak(db_str.into_boxed_str());
        full.push(db_leaked);
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[tokio::test]
    async fn test_init_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let out = execute(&cli_for(dir.path(), &["init"])).await.unwrap();
        assert!(out.contains("initialized"));

        let out = execute(&cli_for(dir.path(), &["stats"])).await.unwrap();
        assert!(out.contains("documents: 0"));
    }

    #[tokio::test]
    async fn test_ingest_then_search() {
        let dir = tempfile::tempdir().unwrap();
        let law = dir.path().join("环境保护法.txt");
        std::fs::write(
            &law,
            "第三十条 企业事业单位和其他生产经营者，应当防止、减少环境污染和生态破坏。",
        )
        .unwrap();

        let out = execute(&cli_for(dir.path(), &["ingest", law.to_str().unwrap()]))
            .await
            .unwrap();
        assert!(out.contains("ingested"));

        let out = execute(&cli_for(dir.path(), &["search", "环境保护法第30条"]))
            .await
            .unwrap();
        assert!(out.contains("第三十条"));
    }

    #[tokio::test]
    async fn test_search_json_format() {
        let dir = tempfile::tempdir().unwrap();
        let out = execute(&cli_for(dir.path(), &["--format", "json", "search", "任意查询"]))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(parsed.is_array());
    }

    #[tokio::test]
    async fn test_missing_file_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = execute(&cli_for(dir.path(), &["ingest", "/nonexistent/file.txt"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_sessions_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let out = execute(&cli_for(dir.path(), &["sessions", "list"])).await.unwrap();
        assert!(out.contains("no sessions"));
    }
}
