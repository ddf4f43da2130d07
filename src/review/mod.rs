//! Contract review pipeline.
//!
//! Each review is a coarse state machine (`PENDING -> PROCESSING ->
//! COMPLETED | FAILED`) driven by a single-writer worker task. Stages run
//! in order — PARSING, ANALYZING (two prompts in parallel),
//! GENERATING_REPORT — with progress fanned out through the
//! [`ProgressBroker`]. Re-submitting the same contract attaches to the
//! existing review instead of starting another.

pub mod progress;
pub mod prompts;
pub mod report;

pub use progress::{ProgressBroker, ProgressEvent};
pub use prompts::{KeyClause, KeyClauses, RiskDimension, RiskDimensions};
pub use report::{ReportModel, assemble_report, compliance_score, derive_risk_clauses};

use crate::analyzer::StructuredAnalyzer;
use crate::backend::ChatBackend;
use crate::config::CoreConfig;
use crate::core::{ContractReview, ReviewStatus, content_hash};
use crate::error::{Error, ReviewError, Result, StorageError};
use crate::extract::TextExtractor;
use crate::render::ReportRenderer;
use crate::runtime::{CallPool, RetryConfig, check_cancelled, with_deadline};
use crate::storage::SharedStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Upload acknowledgement returned by [`ReviewPipeline::submit`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewTicket {
    /// Review id to poll or stream.
    pub review_id: String,
    /// Status at submission time.
    pub status: ReviewStatus,
    /// sha-256 of the uploaded bytes.
    pub file_hash: String,
    /// Upload size in bytes.
    pub size: usize,
}

/// The contract review pipeline.
pub struct ReviewPipeline {
    config: CoreConfig,
    store: SharedStore,
    extractor: Arc<dyn TextExtractor>,
    backend: Arc<dyn ChatBackend>,
    renderer: Arc<dyn ReportRenderer>,
    broker: Arc<ProgressBroker>,
    call_pool: Arc<CallPool>,
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl ReviewPipeline {
    /// Creates a pipeline over the given ports.
    #[must_use]
    pub fn new(
        config: CoreConfig,
        store: SharedStore,
        extractor: Arc<dyn TextExtractor>,
        backend: Arc<dyn ChatBackend>,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Self {
        let call_pool = Arc::new(CallPool::new(
            "review-backend",
            config.max_concurrent_model_calls,
            config.queue_capacity,
        ));
        Self {
            config,
            store,
            extractor,
            backend,
            renderer,
            broker: Arc::new(ProgressBroker::new()),
            call_pool,
            cancel_tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Submits a contract for review.
    ///
    /// Uploading bytes the user already submitted returns the existing
    /// review: in-flight reviews are attached to (their progress channel
    /// keeps streaming), finished ones return their recorded status.
    ///
    /// # Errors
    ///
    /// Returns storage errors; analysis failures surface through the
    /// review status, not through this call.
    pub async fn submit(
        self: &Arc<Self>,
        user_id: &str,
        filename: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<ReviewTicket> {
        let hash = content_hash(&bytes);
        let size = bytes.len();

        let review = {
            let mut store = self.store.lock().await;
            if let Some(existing) = store.find_review_by_hash(user_id, &hash)? {
                tracing::info!(review_id = %existing.id, status = ?existing.status, "duplicate submission");
                return Ok(ReviewTicket {
                    review_id: existing.id,
                    status: existing.status,
                    file_hash: hash,
                    size,
                });
            }
            let review = ContractReview::new(user_id, filename, size, &hash);
            store.insert_review(&review)?;
            review
        };

        let token = CancellationToken::new();
        if let Ok(mut tokens) = self.cancel_tokens.lock() {
            tokens.insert(review.id.clone(), token.clone());
        }

        let this = Arc::clone(self);
        let review_id = review.id.clone();
        let mime = mime.to_string();
        tokio::spawn(async move {
            this.run_review(&review_id, &mime, &bytes, token).await;
            if let Ok(mut tokens) = this.cancel_tokens.lock() {
                tokens.remove(&review_id);
            }
        });

        Ok(ReviewTicket {
            review_id: review.id,
            status: ReviewStatus::Pending,
            file_hash: hash,
            size,
        })
    }

    /// Subscribes to a review's progress stream. The last event is
    /// replayed immediately for late subscribers.
    #[must_use]
    pub fn subscribe(
        &self,
        review_id: &str,
    ) -> (Option<ProgressEvent>, broadcast::Receiver<ProgressEvent>) {
        self.broker.subscribe(review_id)
    }

    /// Requests cancellation of an in-flight review. The worker observes
    /// it at the next stage boundary and marks the review `FAILED` with
    /// reason `cancelled`.
    pub fn cancel(&self, review_id: &str) {
        if let Ok(tokens) = self.cancel_tokens.lock()
            && let Some(token) = tokens.get(review_id)
        {
            token.cancel();
        }
    }

    /// Loads a review.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids.
    pub async fn get_review(&self, review_id: &str) -> Result<ContractReview> {
        let store = self.store.lock().await;
        store.get_review(review_id)?.ok_or_else(|| {
            StorageError::ReviewNotFound {
                id: review_id.to_string(),
            }
            .into()
        })
    }

    /// Renders the completed review's report as PDF bytes.
    ///
    /// # Errors
    ///
    /// Returns `Conflict`-class errors while the review is still running
    /// and `NotFound` for unknown ids.
    pub async fn report_pdf(&self, review_id: &str) -> Result<Vec<u8>> {
        let review = self.get_review(review_id).await?;
        let Some(result) = review.result else {
            return Err(StorageError::InvalidTransition {
                from: review.status.as_str().to_string(),
                to: "REPORT".to_string(),
            }
            .into());
        };
        self.renderer.render(&result)
    }

    /// Single-writer worker: drives the stages and owns every state
    /// transition for its review id.
    async fn run_review(&self, review_id: &str, mime: &str, bytes: &[u8], token: CancellationToken) {
        let deadline = self.config.review_deadline();
        let outcome = with_deadline(deadline, self.run_stages(review_id, mime, bytes, &token)).await;

        if let Err(e) = outcome {
            let reason = match &e {
                Error::Cancelled => "cancelled".to_string(),
                other => other.to_string(),
            };
            tracing::error!(review_id, error = %reason, "review failed");
            {
                let mut store = self.store.lock().await;
                if let Err(te) =
                    store.transition_review(review_id, ReviewStatus::Failed, Some(&reason))
                {
                    tracing::error!(review_id, error = %te, "failed to record FAILED status");
                }
            }
            self.broker.publish(ProgressEvent::failed(review_id, &reason));
        }
    }

    async fn run_stages(
        &self,
        review_id: &str,
        mime: &str,
        bytes: &[u8],
        token: &CancellationToken,
    ) -> Result<()> {
        {
            let mut store = self.store.lock().await;
            store.transition_review(review_id, ReviewStatus::Processing, None)?;
        }

        // Stage 1: PARSING.
        self.broker
            .publish(ProgressEvent::stage(review_id, "PARSING", 20, "正在解析合同文本"));
        check_cancelled(token)?;

        let extraction = self.extractor.extract(bytes, mime)?;
        let text = extraction.text;
        let chars = text.trim().chars().count();
        if chars < self.config.min_contract_chars {
            return Err(ReviewError::ContractTooShort {
                chars,
                min: self.config.min_contract_chars,
            }
            .into());
        }
        {
            let mut store = self.store.lock().await;
            store.set_review_text(review_id, &text)?;
        }

        // Stage 2: ANALYZING — both prompts in parallel, each with its own
        // per-call timeout and transient retry.
        self.broker
            .publish(ProgressEvent::stage(review_id, "ANALYZING", 60, "正在进行风险分析"));
        check_cancelled(token)?;

        let risk_prompt = prompts::build_risk_prompt(&text);
        let clause_prompt = prompts::build_clause_prompt(&text);
        let (dimensions, clauses) = tokio::try_join!(
            self.analyze::<RiskDimensions>(&risk_prompt),
            self.analyze::<KeyClauses>(&clause_prompt),
        )?;

        // Stage 3: GENERATING_REPORT.
        self.broker.publish(ProgressEvent::stage(
            review_id,
            "GENERATING_REPORT",
            90,
            "正在生成审查报告",
        ));
        check_cancelled(token)?;

        let report = assemble_report(&dimensions.0, &clauses.0);
        let risk_clauses = derive_risk_clauses(review_id, &dimensions.0);
        let result = serde_json::to_value(&report).map_err(|e| {
            Error::internal("report serialization failed", &e)
        })?;
        {
            let mut store = self.store.lock().await;
            store.complete_review(
                review_id,
                &result,
                report.executive_summary.risk_level,
                &risk_clauses,
            )?;
        }

        self.broker
            .publish(ProgressEvent::completed(review_id, "审查完成"));
        tracing::info!(
            review_id,
            risks = risk_clauses.len(),
            score = report.deep_analysis.compliance.score,
            "review completed"
        );
        Ok(())
    }

    /// One structured-analysis call under the stage timeout and the
    /// bounded backend pool.
    async fn analyze<T: crate::analyzer::StructuredSchema>(&self, prompt: &str) -> Result<T> {
        let _permit = self.call_pool.acquire().await?;
        let analyzer = StructuredAnalyzer::new(self.backend.as_ref())
            .with_retry(RetryConfig::with_attempts(3));
        with_deadline(self.config.review_stage_timeout(), analyzer.extract(prompt)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ScriptedBackend, ScriptedResponse};
    use crate::extract::PlainTextExtractor;
    use crate::render::MinimalPdfRenderer;
    use crate::storage::{SqliteStore, Store as _, shared};
    use std::time::Duration;

    const RISK_JSON: &str = r#"[
  {
    "dimensionName": "违约责任",
    "riskLevel": "高",
    "riskPoints": ["违约金为合同总额的50%"],
    "description": "违约金比例过高，可能被法院调减。",
    "legalBasis": "民法典第五百八十五条",
    "improvements": ["将违约金调整为实际损失的30%以内"]
  }
]"#;

    const CLAUSE_JSON: &str = r#"[
  {
    "title": "价款与支付",
    "content": "第三条 合同总价为人民币十万元整。",
    "analysis": "价款明确，但缺少支付期限约定。",
    "importance": "高",
    "isComplete": false,
    "suggestion": "补充具体付款期限"
  }
]"#;

    fn contract_text() -> String {
        format!(
            "合同编号：HT-2024-001\n甲方：某某科技有限公司\n乙方：某某咨询有限公司\n{}",
            "第一条 合同目的。本合同就技术咨询服务相关事项达成一致。\n".repeat(10)
        )
    }

    fn pipeline_with(backend: ScriptedBackend, config: CoreConfig) -> Arc<ReviewPipeline> {
        let mut sqlite = SqliteStore::in_memory().unwrap();
        sqlite.init().unwrap();
        Arc::new(ReviewPipeline::new(
            config,
            shared(sqlite),
            Arc::new(PlainTextExtractor::new()),
            Arc::new(backend),
            Arc::new(MinimalPdfRenderer::new()),
        ))
    }

    fn happy_backend() -> ScriptedBackend {
        // ANALYZING runs both prompts concurrently, so the responses are
        // keyed by prompt content rather than queued.
        let backend = ScriptedBackend::new();
        backend.add_rule("逐项审查合同", ScriptedResponse::Text(RISK_JSON.to_string()));
        backend.add_rule("关键条款", ScriptedResponse::Text(CLAUSE_JSON.to_string()));
        backend
    }

    async fn wait_terminal(
        pipeline: &Arc<ReviewPipeline>,
        review_id: &str,
    ) -> Vec<ProgressEvent> {
        let (last, mut rx) = pipeline.subscribe(review_id);
        let mut events: Vec<ProgressEvent> = last.into_iter().collect();
        if events.last().is_some_and(|e| e.completed) {
            return events;
        }
        while let Ok(event) = rx.recv().await {
            let terminal = event.completed;
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn test_happy_path_stage_sequence() {
        let pipeline = pipeline_with(happy_backend(), CoreConfig::default());
        let ticket = pipeline
            .submit("u1", "contract.txt", "text/plain", contract_text().into_bytes())
            .await
            .unwrap();
        assert_eq!(ticket.status, ReviewStatus::Pending);

        let events = wait_terminal(&pipeline, &ticket.review_id).await;
        let stages: Vec<(&str, u8)> = events
            .iter()
            .map(|e| (e.stage.as_str(), e.progress))
            .collect();
        assert_eq!(
            stages,
            vec![
                ("PARSING", 20),
                ("ANALYZING", 60),
                ("GENERATING_REPORT", 90),
                ("COMPLETED", 100),
            ]
        );
        assert!(events.last().unwrap().completed);
        assert_eq!(
            events.iter().filter(|e| e.completed).count(),
            1,
            "exactly one terminal frame"
        );

        let review = pipeline.get_review(&ticket.review_id).await.unwrap();
        assert_eq!(review.status, ReviewStatus::Completed);
        assert_eq!(review.risk_level, Some(crate::core::RiskLevel::High));
        assert_eq!(review.total_risks, Some(1));
        assert!(review.completed_at.is_some());
        assert!(review.result.is_some());
    }

    #[tokio::test]
    async fn test_report_pdf_after_completion() {
        let pipeline = pipeline_with(happy_backend(), CoreConfig::default());
        let ticket = pipeline
            .submit("u1", "contract.txt", "text/plain", contract_text().into_bytes())
            .await
            .unwrap();
        wait_terminal(&pipeline, &ticket.review_id).await;

        let pdf = pipeline.report_pdf(&ticket.review_id).await.unwrap();
        assert!(pdf.starts_with(b"%PDF"));
        assert!(!pdf.is_empty());
    }

    #[tokio::test]
    async fn test_report_before_completion_rejected() {
        // A backend that stalls keeps the review in PROCESSING.
        let backend = ScriptedBackend::new().with_generate_delay(Duration::from_secs(60));
        let pipeline = pipeline_with(backend, CoreConfig::default());
        let ticket = pipeline
            .submit("u1", "contract.txt", "text/plain", contract_text().into_bytes())
            .await
            .unwrap();

        // Give the worker a moment to pass PARSING.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = pipeline.report_pdf(&ticket.review_id).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conflict);
        pipeline.cancel(&ticket.review_id);
    }

    #[tokio::test]
    async fn test_short_contract_fails_in_parsing() {
        let pipeline = pipeline_with(happy_backend(), CoreConfig::default());
        let ticket = pipeline
            .submit("u1", "tiny.txt", "text/plain", "太短的合同".into())
            .await
            .unwrap();

        let events = wait_terminal(&pipeline, &ticket.review_id).await;
        let last = events.last().unwrap();
        assert_eq!(last.stage, "ERROR");
        assert!(last.completed);
        assert!(last.error.as_deref().unwrap().contains("too short"));

        let review = pipeline.get_review(&ticket.review_id).await.unwrap();
        assert_eq!(review.status, ReviewStatus::Failed);
        assert!(review.error_message.is_some());
    }

    #[tokio::test]
    async fn test_invalid_model_output_fails_review() {
        // Both the first answer and the repair are garbage.
        let backend = ScriptedBackend::with_responses([
            ScriptedResponse::Text("not json".to_string()),
            ScriptedResponse::Text("still not json".to_string()),
            ScriptedResponse::Text("not json either".to_string()),
            ScriptedResponse::Text("nope".to_string()),
        ]);
        let pipeline = pipeline_with(backend, CoreConfig::default());
        let ticket = pipeline
            .submit("u1", "contract.txt", "text/plain", contract_text().into_bytes())
            .await
            .unwrap();

        let events = wait_terminal(&pipeline, &ticket.review_id).await;
        assert_eq!(events.last().unwrap().stage, "ERROR");
        let review = pipeline.get_review(&ticket.review_id).await.unwrap();
        assert_eq!(review.status, ReviewStatus::Failed);
    }

    #[tokio::test]
    async fn test_transient_backend_errors_retried() {
        // One transient failure from the queue, then the rules answer.
        let backend = happy_backend();
        backend.push(ScriptedResponse::TransientError("503".to_string()));
        let pipeline = pipeline_with(backend, CoreConfig::default());
        let ticket = pipeline
            .submit("u1", "contract.txt", "text/plain", contract_text().into_bytes())
            .await
            .unwrap();

        let events = wait_terminal(&pipeline, &ticket.review_id).await;
        assert_eq!(events.last().unwrap().stage, "COMPLETED");
    }

    #[tokio::test]
    async fn test_stage_timeout_fails_review() {
        let backend = ScriptedBackend::new().with_generate_delay(Duration::from_millis(200));
        let config = CoreConfig {
            review_stage_timeout_secs: 0, // elapses immediately
            ..CoreConfig::default()
        };
        let pipeline = pipeline_with(backend, config);
        let ticket = pipeline
            .submit("u1", "contract.txt", "text/plain", contract_text().into_bytes())
            .await
            .unwrap();

        let events = wait_terminal(&pipeline, &ticket.review_id).await;
        let last = events.last().unwrap();
        assert_eq!(last.stage, "ERROR");
        assert!(last.error.as_deref().unwrap().contains("deadline"));
    }

    #[tokio::test]
    async fn test_resubmit_in_flight_attaches() {
        let backend = ScriptedBackend::new().with_generate_delay(Duration::from_millis(200));
        let pipeline = pipeline_with(backend, CoreConfig::default());
        let bytes = contract_text().into_bytes();

        let first = pipeline
            .submit("u1", "contract.txt", "text/plain", bytes.clone())
            .await
            .unwrap();
        let second = pipeline
            .submit("u1", "contract.txt", "text/plain", bytes)
            .await
            .unwrap();

        assert_eq!(first.review_id, second.review_id, "no duplicate review");
        pipeline.cancel(&first.review_id);
    }

    #[tokio::test]
    async fn test_resubmit_completed_returns_existing() {
        let pipeline = pipeline_with(happy_backend(), CoreConfig::default());
        let bytes = contract_text().into_bytes();
        let first = pipeline
            .submit("u1", "contract.txt", "text/plain", bytes.clone())
            .await
            .unwrap();
        wait_terminal(&pipeline, &first.review_id).await;

        let second = pipeline
            .submit("u1", "contract.txt", "text/plain", bytes)
            .await
            .unwrap();
        assert_eq!(second.review_id, first.review_id);
        assert_eq!(second.status, ReviewStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_marks_failed_with_reason() {
        // Valid analysis responses arriving slowly, so cancellation lands
        // at the stage boundary before GENERATING_REPORT.
        let backend = happy_backend().with_generate_delay(Duration::from_millis(300));
        let pipeline = pipeline_with(backend, CoreConfig::default());
        let ticket = pipeline
            .submit("u1", "contract.txt", "text/plain", contract_text().into_bytes())
            .await
            .unwrap();

        // Let the worker reach ANALYZING, then cancel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        pipeline.cancel(&ticket.review_id);

        let events = wait_terminal(&pipeline, &ticket.review_id).await;
        let last = events.last().unwrap();
        assert!(last.completed);
        assert_eq!(last.stage, "ERROR");

        let review = pipeline.get_review(&ticket.review_id).await.unwrap();
        assert_eq!(review.status, ReviewStatus::Failed);
        assert_eq!(review.error_message.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_status_transitions_monotonic_in_store() {
        let pipeline = pipeline_with(happy_backend(), CoreConfig::default());
        let ticket = pipeline
            .submit("u1", "contract.txt", "text/plain", contract_text().into_bytes())
            .await
            .unwrap();
        wait_terminal(&pipeline, &ticket.review_id).await;

        // A COMPLETED review rejects further transitions.
        let mut store = pipeline.store.lock().await;
        assert!(
            store
                .transition_review(&ticket.review_id, ReviewStatus::Processing, None)
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_risk_clauses_persisted() {
        let pipeline = pipeline_with(happy_backend(), CoreConfig::default());
        let ticket = pipeline
            .submit("u1", "contract.txt", "text/plain", contract_text().into_bytes())
            .await
            .unwrap();
        wait_terminal(&pipeline, &ticket.review_id).await;

        let store = pipeline.store.lock().await;
        let clauses = store.get_risk_clauses(&ticket.review_id).unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].risk_type, "违约责任");
    }
}
