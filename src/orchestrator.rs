use std::sync::Arc;

use crate::config::{AiConfig, JudgeConfig};
use crate::database::JudgeStore;
use crate::error::{JudgeError, Result};
use crate::model::{Problem, TestCase, Verdict};
use crate::sandbox::ProcessExecutor;
use crate::strategy::{
    AiStrategy, HttpAiJudge, JudgeRequest, JudgingStrategy, TraditionalStrategy,
};
use crate::workspace::WorkspaceManager;

/// Entry point of the judging pipeline.
///
/// Strategies are tried in order; a strategy that is unavailable is skipped
/// and one that fails hands over to the next. Whatever happens, the
/// submission ends in a terminal state and the problem's statistics are
/// updated exactly once.
pub struct Orchestrator {
    store: Arc<dyn JudgeStore>,
    strategies: Vec<Arc<dyn JudgingStrategy>>,
}

impl Orchestrator {
    /// An orchestrator whose only strategy is `fallback`
    pub fn new(store: Arc<dyn JudgeStore>, fallback: Arc<dyn JudgingStrategy>) -> Self {
        Self {
            store,
            strategies: vec![fallback],
        }
    }

    /// Puts `strategy` in front of the existing chain
    pub fn with_primary(mut self, strategy: Arc<dyn JudgingStrategy>) -> Self {
        self.strategies.insert(0, strategy);
        self
    }

    /// Builds the standard pipeline: the AI judge when enabled, backed by
    /// the traditional judge running real processes.
    pub fn from_config(
        judge: &JudgeConfig,
        ai: &AiConfig,
        store: Arc<dyn JudgeStore>,
    ) -> Result<Self> {
        let traditional = TraditionalStrategy::new(
            WorkspaceManager::new(judge.workspace_root()),
            Arc::new(ProcessExecutor::new()),
        )
        .with_limits(judge.limits());

        let mut orchestrator = Self::new(store, Arc::new(traditional));

        if ai.enabled {
            let client = HttpAiJudge::new(
                ai.endpoint.clone(),
                ai.api_key.clone(),
                ai.timeout.as_duration(),
            )?;
            orchestrator = orchestrator.with_primary(Arc::new(AiStrategy::new(Arc::new(client))));
            log::info!("AI judging enabled with traditional fallback");
        }

        Ok(orchestrator)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn judge(
        &self,
        submission_id: i64,
        problem: Problem,
        test_cases: Vec<TestCase>,
        code: String,
        language: String,
    ) -> Verdict {
        let request = JudgeRequest {
            submission_id,
            problem,
            test_cases,
            code,
            language,
        };
        log::info!(
            "Judging submission {submission_id} ({}, {} test cases)",
            request.language,
            request.test_cases.len()
        );

        let verdict = match self.compute(&request).await {
            Ok(verdict) => verdict,
            Err(e) => {
                log::error!("Judging submission {submission_id} failed: {e}");
                Verdict::internal_error(request.total_cases(), format!("Internal judge error: {e}"))
            }
        };

        self.finalize(submission_id, request.problem.id, &verdict).await;
        log::info!(
            "Submission {submission_id} finished: {} ({}/{})",
            verdict.status,
            verdict.test_cases_passed,
            verdict.total_test_cases
        );
        verdict
    }

    /// Ends a submission with `internal_error` without judging it
    pub async fn fail(
        &self,
        submission_id: i64,
        problem_id: i64,
        total_test_cases: u32,
        message: impl Into<String>,
    ) -> Verdict {
        let verdict = Verdict::internal_error(total_test_cases, message);
        self.finalize(submission_id, problem_id, &verdict).await;
        verdict
    }

    async fn compute(&self, request: &JudgeRequest) -> Result<Verdict> {
        self.store.mark_judging(request.submission_id).await?;

        let mut last_error = None;
        for strategy in &self.strategies {
            if !strategy.is_available().await {
                log::debug!("{} judge unavailable, skipping", strategy.name());
                continue;
            }

            log::info!(
                "Using {} judge for submission {}",
                strategy.name(),
                request.submission_id
            );
            match strategy.compute_verdict(request).await {
                Ok(verdict) => return Ok(verdict),
                Err(e) => {
                    log::warn!(
                        "{} judge failed on submission {}: {e}",
                        strategy.name(),
                        request.submission_id
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| JudgeError::Internal("no judging strategy available".to_string())))
    }

    async fn finalize(&self, submission_id: i64, problem_id: i64, verdict: &Verdict) {
        match self.store.save_verdict(submission_id, verdict).await {
            Ok(()) => {}
            Err(JudgeError::SubmissionNotFound(_)) => {
                // Nothing was recorded, so nothing is counted either
                log::error!("Submission {submission_id} does not exist, verdict discarded");
                return;
            }
            Err(e) => {
                log::error!("Failed to save verdict of submission {submission_id}: {e}");

                // Last attempt at leaving the submission in a terminal state
                let fallback = Verdict::internal_error(
                    verdict.total_test_cases,
                    format!("Internal judge error: {e}"),
                );
                if let Err(e) = self.store.save_verdict(submission_id, &fallback).await {
                    log::error!("Submission {submission_id} left unfinished: {e}");
                }
            }
        }

        if let Err(e) = self
            .store
            .record_judged(problem_id, submission_id, verdict.is_accepted())
            .await
        {
            log::error!("Failed to update statistics for submission {submission_id}: {e}");
        }
    }
}
