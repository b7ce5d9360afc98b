use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::{JudgeError, Result};
use crate::model::{Problem, Submission, SubmissionStatus, TestCase, User, Verdict};

const DATABASE_NAME: &str = "codejudge.sqlite3";

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS users (
        id               INTEGER PRIMARY KEY,
        name             TEXT    NOT NULL UNIQUE,
        solved_problems  INTEGER NOT NULL DEFAULT 0
    );",
    r"
    CREATE TABLE IF NOT EXISTS problems (
        id                INTEGER PRIMARY KEY,
        title             TEXT    NOT NULL,
        description       TEXT    NOT NULL DEFAULT '',
        time_limit        INTEGER NOT NULL DEFAULT 0,
        memory_limit      INTEGER NOT NULL DEFAULT 0,
        accepted_count    INTEGER NOT NULL DEFAULT 0,
        submission_count  INTEGER NOT NULL DEFAULT 0
    );",
    r"
    CREATE TABLE IF NOT EXISTS test_cases (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        problem_id       INTEGER NOT NULL,
        position         INTEGER NOT NULL,
        input            TEXT    NOT NULL,
        expected_output  TEXT    NOT NULL,
        is_hidden        INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (problem_id)  REFERENCES problems (id)
    );",
    "CREATE INDEX IF NOT EXISTS idx_test_cases_problem ON test_cases(problem_id, position);",
    r"
    CREATE TABLE IF NOT EXISTS submissions (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id            INTEGER NOT NULL,
        problem_id         INTEGER NOT NULL,
        code               TEXT    NOT NULL,
        language           TEXT    NOT NULL,
        status             TEXT    NOT NULL,
        test_cases_passed  INTEGER NOT NULL DEFAULT 0,
        total_test_cases   INTEGER NOT NULL DEFAULT 0,
        execution_time     INTEGER NOT NULL DEFAULT 0,
        error_message      TEXT,
        ai_analysis        TEXT,
        created_time       TEXT    NOT NULL,
        updated_time       TEXT    NOT NULL,
        FOREIGN KEY (user_id)     REFERENCES users (id),
        FOREIGN KEY (problem_id)  REFERENCES problems (id)
    );",
    "INSERT OR IGNORE INTO users (id, name) VALUES (0, 'root');",
];

/// Default database location in the per-user local data directory
pub fn get_db_path() -> std::io::Result<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "codejudge").ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "unable to find user directory")
    })?;
    let data_dir = proj_dirs.data_local_dir();
    fs::create_dir_all(data_dir)?;

    Ok(data_dir.join(DATABASE_NAME))
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display()); // rwc = read/write/create
    let db_pool = SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(0)
        .connect(&db_url)
        .await?;

    // PRAGMAs cannot run inside a transaction
    for pragma_sql in &[
        "PRAGMA foreign_keys = ON;",
        "PRAGMA busy_timeout = 2000;",
        "PRAGMA journal_mode = WAL;",
        "PRAGMA synchronous = NORMAL;",
    ] {
        sqlx::query(pragma_sql).execute(&db_pool).await?;
    }
    create_schema(&db_pool).await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

/// A private in-memory database, mostly useful for tests and dry runs.
///
/// The pool is pinned to a single connection that never expires, since every
/// new in-memory connection would open an empty database.
pub async fn init_memory_db() -> sqlx::Result<SqlitePool> {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(&db_pool)
        .await?;
    create_schema(&db_pool).await?;

    Ok(db_pool)
}

async fn create_schema(pool: &SqlitePool) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    for sql in SCHEMA {
        sqlx::query(sql).execute(&mut *tx).await?;
    }
    tx.commit().await
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // WAL and SHM files might not exist
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

/// Storage operations the judging orchestrator depends on.
///
/// Counter updates are expressed as deltas so concurrent judging tasks
/// never overwrite each other's increments.
#[async_trait]
pub trait JudgeStore: Send + Sync {
    async fn mark_judging(&self, submission_id: i64) -> Result<()>;

    async fn save_verdict(&self, submission_id: i64, verdict: &Verdict) -> Result<()>;

    /// Counts a judged submission against its problem, and credits the
    /// submitting user when it was accepted
    async fn record_judged(&self, problem_id: i64, submission_id: i64, accepted: bool)
    -> Result<()>;
}

/// Test case content as supplied by a problem setter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTestCase {
    pub input: String,
    pub expected_output: String,
    pub is_hidden: bool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    solved_problems: i64,
}

#[derive(sqlx::FromRow)]
struct ProblemRow {
    id: i64,
    title: String,
    description: String,
    time_limit: i64,
    memory_limit: i64,
    accepted_count: i64,
    submission_count: i64,
}

#[derive(sqlx::FromRow)]
struct TestCaseRow {
    id: i64,
    problem_id: i64,
    input: String,
    expected_output: String,
    is_hidden: bool,
}

#[derive(sqlx::FromRow)]
struct SubmissionRow {
    id: i64,
    user_id: i64,
    problem_id: i64,
    code: String,
    language: String,
    status: String,
    test_cases_passed: i64,
    total_test_cases: i64,
    execution_time: i64,
    error_message: Option<String>,
    ai_analysis: Option<String>,
    created_time: String,
    updated_time: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            solved_problems: row.solved_problems,
        }
    }
}

impl From<ProblemRow> for Problem {
    fn from(row: ProblemRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            time_limit: row.time_limit.max(0) as u64,
            memory_limit: row.memory_limit.max(0) as u64,
            accepted_count: row.accepted_count,
            submission_count: row.submission_count,
        }
    }
}

impl From<TestCaseRow> for TestCase {
    fn from(row: TestCaseRow) -> Self {
        Self {
            id: row.id,
            problem_id: row.problem_id,
            input: row.input,
            expected_output: row.expected_output,
            is_hidden: row.is_hidden,
        }
    }
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = JudgeError;

    fn try_from(row: SubmissionRow) -> Result<Self> {
        let status = row.status.parse::<SubmissionStatus>().map_err(|e| {
            JudgeError::Internal(format!("submission {} has {e}", row.id))
        })?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            problem_id: row.problem_id,
            code: row.code,
            language: row.language,
            status,
            test_cases_passed: row.test_cases_passed.max(0) as u32,
            total_test_cases: row.total_test_cases.max(0) as u32,
            execution_time: row.execution_time.max(0) as u64,
            error_message: row.error_message,
            ai_analysis: row.ai_analysis,
            created_time: row.created_time,
            updated_time: row.updated_time,
        })
    }
}

/// SQLite-backed store for users, problems, test cases and submissions
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_user(&self, name: &str) -> Result<User> {
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (name) VALUES (?) RETURNING id, name, solved_problems",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    /// Inserts the user, or renames it when the id already exists
    pub async fn upsert_user(&self, id: i64, name: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO users (id, name) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            ",
        )
        .bind(id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fetch_user(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, solved_problems FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    /// Inserts or updates a problem's definition; its counters are left alone
    pub async fn upsert_problem(
        &self,
        id: i64,
        title: &str,
        description: &str,
        time_limit: u64,
        memory_limit: u64,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO problems (id, title, description, time_limit, memory_limit)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                time_limit = excluded.time_limit,
                memory_limit = excluded.memory_limit
            ",
        )
        .bind(id)
        .bind(title)
        .bind(description)
        .bind(time_limit as i64)
        .bind(memory_limit as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fetch_problem(&self, id: i64) -> Result<Option<Problem>> {
        let row = sqlx::query_as::<_, ProblemRow>(
            r"
            SELECT id, title, description, time_limit, memory_limit,
                   accepted_count, submission_count
            FROM problems WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Problem::from))
    }

    /// Replaces all test cases of a problem, keeping the supplied order
    pub async fn replace_test_cases(&self, problem_id: i64, cases: &[NewTestCase]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM test_cases WHERE problem_id = ?")
            .bind(problem_id)
            .execute(&mut *tx)
            .await?;

        for (position, case) in cases.iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO test_cases (problem_id, position, input, expected_output, is_hidden)
                VALUES (?, ?, ?, ?, ?)
                ",
            )
            .bind(problem_id)
            .bind(position as i64)
            .bind(&case.input)
            .bind(&case.expected_output)
            .bind(case.is_hidden)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn fetch_test_cases(&self, problem_id: i64) -> Result<Vec<TestCase>> {
        let rows = sqlx::query_as::<_, TestCaseRow>(
            r"
            SELECT id, problem_id, input, expected_output, is_hidden
            FROM test_cases WHERE problem_id = ?
            ORDER BY position
            ",
        )
        .bind(problem_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TestCase::from).collect())
    }

    /// Records a new submission in the `queued` state and returns its id
    pub async fn create_submission(
        &self,
        user_id: i64,
        problem_id: i64,
        code: &str,
        language: &str,
    ) -> Result<i64> {
        let now = crate::create_timestamp();

        let result = sqlx::query(
            r"
            INSERT INTO submissions (user_id, problem_id, code, language, status, created_time, updated_time)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(user_id)
        .bind(problem_id)
        .bind(code)
        .bind(language)
        .bind(SubmissionStatus::Queued.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn fetch_submission(&self, id: i64) -> Result<Option<Submission>> {
        log::debug!("Trying to fetch submission {id} from database");

        let row = sqlx::query_as::<_, SubmissionRow>(
            r"
            SELECT id, user_id, problem_id, code, language, status,
                   test_cases_passed, total_test_cases, execution_time,
                   error_message, ai_analysis, created_time, updated_time
            FROM submissions WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Submission::try_from).transpose()
    }
}

#[async_trait]
impl JudgeStore for SqliteStore {
    async fn mark_judging(&self, submission_id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE submissions SET status = ?, updated_time = ? WHERE id = ?")
            .bind(SubmissionStatus::Judging.as_str())
            .bind(crate::create_timestamp())
            .bind(submission_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(JudgeError::SubmissionNotFound(submission_id));
        }
        Ok(())
    }

    async fn save_verdict(&self, submission_id: i64, verdict: &Verdict) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE submissions
            SET status = ?, test_cases_passed = ?, total_test_cases = ?, execution_time = ?,
                error_message = ?, ai_analysis = ?, updated_time = ?
            WHERE id = ?
            ",
        )
        .bind(verdict.status.as_str())
        .bind(i64::from(verdict.test_cases_passed))
        .bind(i64::from(verdict.total_test_cases))
        .bind(verdict.execution_time as i64)
        .bind(verdict.error_message.as_deref())
        .bind(verdict.ai_analysis.as_deref())
        .bind(crate::create_timestamp())
        .bind(submission_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JudgeError::SubmissionNotFound(submission_id));
        }
        Ok(())
    }

    async fn record_judged(
        &self,
        problem_id: i64,
        submission_id: i64,
        accepted: bool,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            UPDATE problems
            SET submission_count = submission_count + 1,
                accepted_count = accepted_count + ?
            WHERE id = ?
            ",
        )
        .bind(i64::from(accepted))
        .bind(problem_id)
        .execute(&mut *tx)
        .await?;

        if accepted {
            sqlx::query(
                r"
                UPDATE users SET solved_problems = solved_problems + 1
                WHERE id = (SELECT user_id FROM submissions WHERE id = ?)
                ",
            )
            .bind(submission_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::new(init_memory_db().await.unwrap())
    }

    #[tokio::test]
    async fn submission_lifecycle() {
        let store = store().await;
        let user = store.create_user("alice").await.unwrap();
        store.upsert_problem(1, "Palindrome", "", 1000, 64).await.unwrap();

        let id = store
            .create_submission(user.id, 1, "print('true')", "python")
            .await
            .unwrap();
        let submission = store.fetch_submission(id).await.unwrap().unwrap();
        assert_eq!(submission.status, SubmissionStatus::Queued);
        assert_eq!(submission.user_id, user.id);

        store.mark_judging(id).await.unwrap();
        let verdict = Verdict::failed(SubmissionStatus::WrongAnswer, 1, 3, 40, "nope");
        store.save_verdict(id, &verdict).await.unwrap();

        let submission = store.fetch_submission(id).await.unwrap().unwrap();
        assert_eq!(submission.status, SubmissionStatus::WrongAnswer);
        assert_eq!(submission.test_cases_passed, 1);
        assert_eq!(submission.total_test_cases, 3);
        assert_eq!(submission.execution_time, 40);
        assert_eq!(submission.error_message.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn missing_submissions_are_reported() {
        let store = store().await;
        assert!(matches!(
            store.mark_judging(42).await,
            Err(JudgeError::SubmissionNotFound(42))
        ));
        let verdict = Verdict::accepted(1, 3);
        assert!(matches!(
            store.save_verdict(42, &verdict).await,
            Err(JudgeError::SubmissionNotFound(42))
        ));
    }

    #[tokio::test]
    async fn counters_only_ever_add() {
        let store = store().await;
        let user = store.create_user("bob").await.unwrap();
        store.upsert_problem(5, "Sum", "", 0, 0).await.unwrap();
        let id = store.create_submission(user.id, 5, "", "cpp").await.unwrap();

        store.record_judged(5, id, false).await.unwrap();
        store.record_judged(5, id, true).await.unwrap();

        let problem = store.fetch_problem(5).await.unwrap().unwrap();
        assert_eq!(problem.submission_count, 2);
        assert_eq!(problem.accepted_count, 1);
        assert_eq!(store.fetch_user(user.id).await.unwrap().unwrap().solved_problems, 1);

        // Re-seeding a problem keeps its statistics
        store.upsert_problem(5, "Sum v2", "", 500, 16).await.unwrap();
        let problem = store.fetch_problem(5).await.unwrap().unwrap();
        assert_eq!(problem.title, "Sum v2");
        assert_eq!(problem.submission_count, 2);
    }

    #[tokio::test]
    async fn test_cases_keep_their_order() {
        let store = store().await;
        store.upsert_problem(2, "Echo", "", 0, 0).await.unwrap();
        let cases: Vec<NewTestCase> = ["b", "a", "c"]
            .into_iter()
            .map(|s| NewTestCase {
                input: s.to_string(),
                expected_output: s.to_string(),
                is_hidden: s == "c",
            })
            .collect();
        store.replace_test_cases(2, &cases).await.unwrap();
        store.replace_test_cases(2, &cases).await.unwrap();

        let stored = store.fetch_test_cases(2).await.unwrap();
        let inputs: Vec<_> = stored.iter().map(|c| c.input.as_str()).collect();
        assert_eq!(inputs, ["b", "a", "c"]);
        assert!(stored[2].is_hidden);
    }
}
