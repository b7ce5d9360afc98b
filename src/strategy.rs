mod ai;
mod traditional;

pub use ai::{AiJudge, AiStrategy, AiVerdict, HttpAiJudge};
pub use traditional::{StepLimits, TraditionalStrategy};

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Problem, TestCase, Verdict};

/// Everything a strategy needs to judge one submission
#[derive(Debug, Clone)]
pub struct JudgeRequest {
    pub submission_id: i64,
    pub problem: Problem,
    pub test_cases: Vec<TestCase>,
    pub code: String,
    pub language: String,
}

impl JudgeRequest {
    pub fn total_cases(&self) -> u32 {
        self.test_cases.len() as u32
    }
}

/// One way of turning a submission into a verdict.
///
/// Problems with the submitted program are reported as a non-accepted
/// [`Verdict`]; an `Err` means the strategy itself could not do its job and
/// the caller may try another one.
#[async_trait]
pub trait JudgingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the strategy can currently be used
    async fn is_available(&self) -> bool {
        true
    }

    async fn compute_verdict(&self, request: &JudgeRequest) -> Result<Verdict>;
}
