use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::database::SqliteStore;
use crate::model::Verdict;
use crate::orchestrator::Orchestrator;
use crate::queue::{JudgeQueue, JudgeTask};

pub async fn worker(
    id: usize,
    store: Arc<SqliteStore>,
    orchestrator: Arc<Orchestrator>,
    queue: Arc<JudgeQueue>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    log::info!("Worker {id} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            task = queue.pop() => {
                let JudgeTask { submission_id, responder } = task;
                log::info!("Worker {id} got submission {submission_id} from queue");

                let Some(verdict) = judge_one(submission_id, &store, &orchestrator).await else {
                    continue;
                };

                if let Some(responder) = responder {
                    if responder.send(verdict).is_err() {
                        log::warn!("Nobody waiting for the verdict of submission {submission_id}");
                    } else {
                        log::debug!("Verdict of submission {submission_id} sent from worker {id}");
                    }
                }
            }
        };
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}

/// Loads everything needed to judge the submission and runs it through the
/// orchestrator; `None` when the submission itself cannot be found
async fn judge_one(
    submission_id: i64,
    store: &SqliteStore,
    orchestrator: &Arc<Orchestrator>,
) -> Option<Verdict> {
    let submission = match store.fetch_submission(submission_id).await {
        Ok(Some(submission)) => submission,
        Ok(None) => {
            log::error!("Submission {submission_id} not found, task discarded");
            return None;
        }
        Err(e) => {
            log::error!("Failed to fetch submission {submission_id}, task discarded: {e}");
            return None;
        }
    };
    let problem_id = submission.problem_id;

    let problem = match store.fetch_problem(problem_id).await {
        Ok(Some(problem)) => problem,
        Ok(None) => {
            return Some(
                orchestrator
                    .fail(
                        submission_id,
                        problem_id,
                        0,
                        format!("Internal judge error: problem {problem_id} not found"),
                    )
                    .await,
            );
        }
        Err(e) => {
            return Some(
                orchestrator
                    .fail(submission_id, problem_id, 0, format!("Internal judge error: {e}"))
                    .await,
            );
        }
    };

    let test_cases = match store.fetch_test_cases(problem_id).await {
        Ok(test_cases) => test_cases,
        Err(e) => {
            return Some(
                orchestrator
                    .fail(submission_id, problem_id, 0, format!("Internal judge error: {e}"))
                    .await,
            );
        }
    };
    let total = test_cases.len() as u32;

    // A panic while judging must still leave the submission finished
    let handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move {
            orchestrator
                .judge(
                    submission_id,
                    problem,
                    test_cases,
                    submission.code,
                    submission.language,
                )
                .await
        }
    });

    match handle.await {
        Ok(verdict) => Some(verdict),
        Err(e) => {
            log::error!("Judging submission {submission_id} aborted: {e}");
            Some(
                orchestrator
                    .fail(
                        submission_id,
                        problem_id,
                        total,
                        format!("Internal judge error: {e}"),
                    )
                    .await,
            )
        }
    }
}
