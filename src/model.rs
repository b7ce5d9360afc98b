use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a submission.
///
/// `Queued` and `Judging` are transient; every other state is terminal and
/// doubles as the verdict vocabulary shared by both judging strategies.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Queued,
    Judging,
    Accepted,
    WrongAnswer,
    TimeLimit,
    RuntimeError,
    CompileError,
    InternalError,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Judging => "judging",
            Self::Accepted => "accepted",
            Self::WrongAnswer => "wrong_answer",
            Self::TimeLimit => "time_limit",
            Self::RuntimeError => "runtime_error",
            Self::CompileError => "compile_error",
            Self::InternalError => "internal_error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Judging)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "queued" => Self::Queued,
            "judging" => Self::Judging,
            "accepted" => Self::Accepted,
            "wrong_answer" => Self::WrongAnswer,
            "time_limit" => Self::TimeLimit,
            "runtime_error" => Self::RuntimeError,
            "compile_error" => Self::CompileError,
            "internal_error" => Self::InternalError,
            other => return Err(format!("unknown submission status {other}")),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    pub solved_problems: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: i64,
    pub title: String,
    pub description: String,
    /// Run time limit per test case, in milliseconds
    pub time_limit: u64,
    /// Output ceiling for a run, in megabytes
    pub memory_limit: u64,
    pub accepted_count: i64,
    pub submission_count: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: i64,
    pub problem_id: i64,
    pub input: String,
    pub expected_output: String,
    pub is_hidden: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: i64,
    pub user_id: i64,
    pub problem_id: i64,
    pub code: String,
    pub language: String,
    pub status: SubmissionStatus,
    pub test_cases_passed: u32,
    pub total_test_cases: u32,
    /// Accumulated milliseconds across passed cases
    pub execution_time: u64,
    pub error_message: Option<String>,
    pub ai_analysis: Option<String>,
    pub created_time: String,
    pub updated_time: String,
}

/// Final outcome of judging one submission.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub status: SubmissionStatus,
    pub test_cases_passed: u32,
    pub total_test_cases: u32,
    pub execution_time: u64,
    pub error_message: Option<String>,
    pub ai_analysis: Option<String>,
}

impl Verdict {
    pub fn accepted(total: u32, execution_time: u64) -> Self {
        Self {
            status: SubmissionStatus::Accepted,
            test_cases_passed: total,
            total_test_cases: total,
            execution_time,
            error_message: None,
            ai_analysis: None,
        }
    }

    /// A non-accepted terminal verdict after `passed` cases succeeded.
    pub fn failed(
        status: SubmissionStatus,
        passed: u32,
        total: u32,
        execution_time: u64,
        message: impl Into<String>,
    ) -> Self {
        debug_assert!(status.is_terminal() && status != SubmissionStatus::Accepted);
        Self {
            status,
            test_cases_passed: passed,
            total_test_cases: total,
            execution_time,
            error_message: Some(message.into()),
            ai_analysis: None,
        }
    }

    pub fn internal_error(total: u32, message: impl Into<String>) -> Self {
        Self::failed(SubmissionStatus::InternalError, 0, total, 0, message)
    }

    pub fn is_accepted(&self) -> bool {
        self.status == SubmissionStatus::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_tag() {
        for status in [
            SubmissionStatus::Queued,
            SubmissionStatus::Judging,
            SubmissionStatus::Accepted,
            SubmissionStatus::WrongAnswer,
            SubmissionStatus::TimeLimit,
            SubmissionStatus::RuntimeError,
            SubmissionStatus::CompileError,
            SubmissionStatus::InternalError,
        ] {
            assert_eq!(status.as_str().parse::<SubmissionStatus>(), Ok(status));
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(status.as_str().to_string())
            );
        }
    }

    #[test]
    fn only_queued_and_judging_are_transient() {
        assert!(!SubmissionStatus::Queued.is_terminal());
        assert!(!SubmissionStatus::Judging.is_terminal());
        assert!(SubmissionStatus::CompileError.is_terminal());
        assert!(SubmissionStatus::InternalError.is_terminal());
    }

    #[test]
    fn verdict_serializes_in_camel_case() {
        let verdict = Verdict::failed(SubmissionStatus::TimeLimit, 1, 2, 12, "slow");
        assert_json_diff::assert_json_eq!(
            serde_json::to_value(&verdict).unwrap(),
            serde_json::json!({
                "status": "time_limit",
                "testCasesPassed": 1,
                "totalTestCases": 2,
                "executionTime": 12,
                "errorMessage": "slow",
                "aiAnalysis": null
            })
        );
    }
}
