use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{JudgeError, Result};
use crate::model::{Problem, SubmissionStatus, TestCase, Verdict};

use super::{JudgeRequest, JudgingStrategy};

/// Verdict as reported by an external AI judge
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AiVerdict {
    pub status: SubmissionStatus,
    pub test_cases_passed: u32,
    pub total_test_cases: u32,
    #[serde(default)]
    pub execution_time: u64,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub ai_analysis: Option<String>,
}

/// External judge that estimates a verdict without running the code
#[async_trait]
pub trait AiJudge: Send + Sync {
    async fn is_initialized(&self) -> bool;

    async fn judge_code(
        &self,
        problem: &Problem,
        code: &str,
        language: &str,
        test_cases: &[TestCase],
    ) -> Result<AiVerdict>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AiJudgeRequest<'a> {
    problem: &'a Problem,
    code: &'a str,
    language: &'a str,
    test_cases: &'a [TestCase],
}

/// [`AiJudge`] reached over HTTP with a JSON body and a bearer key
pub struct HttpAiJudge {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl HttpAiJudge {
    pub fn new(
        endpoint: Option<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JudgeError::AiJudge(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.filter(|s| !s.is_empty()),
            api_key: api_key.filter(|s| !s.is_empty()),
        })
    }
}

#[async_trait]
impl AiJudge for HttpAiJudge {
    async fn is_initialized(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }

    async fn judge_code(
        &self,
        problem: &Problem,
        code: &str,
        language: &str,
        test_cases: &[TestCase],
    ) -> Result<AiVerdict> {
        let (Some(endpoint), Some(api_key)) = (&self.endpoint, &self.api_key) else {
            return Err(JudgeError::AiJudge("AI judge is not configured".to_string()));
        };

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(api_key)
            .json(&AiJudgeRequest {
                problem,
                code,
                language,
                test_cases,
            })
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| JudgeError::AiJudge(e.to_string()))?;

        response
            .json::<AiVerdict>()
            .await
            .map_err(|e| JudgeError::AiJudge(format!("malformed response: {e}")))
    }
}

/// Judging strategy backed by an [`AiJudge`]
pub struct AiStrategy {
    judge: Arc<dyn AiJudge>,
}

impl AiStrategy {
    pub fn new(judge: Arc<dyn AiJudge>) -> Self {
        Self { judge }
    }
}

#[async_trait]
impl JudgingStrategy for AiStrategy {
    fn name(&self) -> &'static str {
        "ai"
    }

    async fn is_available(&self) -> bool {
        self.judge.is_initialized().await
    }

    async fn compute_verdict(&self, request: &JudgeRequest) -> Result<Verdict> {
        let reported = self
            .judge
            .judge_code(
                &request.problem,
                &request.code,
                &request.language,
                &request.test_cases,
            )
            .await?;

        log::info!(
            "AI verdict for submission {}: {} ({}/{})",
            request.submission_id,
            reported.status,
            reported.test_cases_passed,
            reported.total_test_cases
        );

        into_verdict(reported)
    }
}

/// Checks the reported verdict against the invariants every verdict upholds
fn into_verdict(reported: AiVerdict) -> Result<Verdict> {
    let AiVerdict {
        status,
        test_cases_passed,
        total_test_cases,
        execution_time,
        feedback,
        ai_analysis,
    } = reported;

    if !status.is_terminal() {
        return Err(JudgeError::AiJudge(format!(
            "non-terminal status {status} reported"
        )));
    }
    if test_cases_passed > total_test_cases {
        return Err(JudgeError::AiJudge(format!(
            "{test_cases_passed} of {total_test_cases} test cases reported as passed"
        )));
    }
    let accepted = status == SubmissionStatus::Accepted;
    // With no test cases a failure such as compile_error is 0/0 as well
    let consistent = if accepted {
        test_cases_passed == total_test_cases
    } else {
        test_cases_passed < total_test_cases || total_test_cases == 0
    };
    if !consistent {
        return Err(JudgeError::AiJudge(format!(
            "status {status} inconsistent with {test_cases_passed}/{total_test_cases} passed"
        )));
    }

    let error_message = if accepted {
        None
    } else {
        Some(feedback.unwrap_or_else(|| format!("AI judge verdict: {status}")))
    };

    Ok(Verdict {
        status,
        test_cases_passed,
        total_test_cases,
        execution_time,
        error_message,
        ai_analysis,
    })
}
