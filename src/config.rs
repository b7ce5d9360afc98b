use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;

use crate::database::{NewTestCase, SqliteStore};
use crate::strategy::StepLimits;

const AI_SWITCH_VAR: &str = "USE_AI_JUDGE";
const AI_KEY_VAR: &str = "AI_JUDGE_API_KEY";

#[derive(Parser, Debug)]
#[command(name = "codejudge", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: PathBuf,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,

    /// Number of judging workers, overriding the configuration file
    #[arg(long = "threads", short = 't')]
    pub threads: Option<usize>,

    /// Problem the source files are submitted to
    #[arg(long, requires = "language")]
    pub problem: Option<i64>,

    /// Submitting user
    #[arg(long, default_value_t = 0)]
    pub user: i64,

    /// Language tag of the source files
    #[arg(long)]
    pub language: Option<String>,

    /// Source files to judge, one submission each
    #[arg(requires = "problem")]
    pub sources: Vec<PathBuf>,
}

impl CliArgs {
    /// Load the configuration from the specified file, with environment
    /// overrides applied
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let mut config = Config::load(&self.config_path)?;
        config.apply_env();
        if let Some(threads) = self.threads {
            config.judge.workers = threads;
        }
        config.validate()?;
        Ok(config)
    }

    /// Directory relative test data paths are resolved against
    pub fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub judge: JudgeConfig,
    pub ai: AiConfig,
    pub database: DatabaseConfig,
    pub users: Vec<UserConfig>,
    pub problems: Vec<ProblemConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open configuration {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("failed to parse configuration {}", path.display()))
    }

    /// Rejects settings the judge cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.judge.workers > 0, "the number of workers must not be 0");
        anyhow::ensure!(
            self.judge.queue_capacity > 0,
            "the judge queue capacity must not be 0"
        );
        Ok(())
    }

    fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(AI_SWITCH_VAR).ok().as_deref(),
            std::env::var(AI_KEY_VAR).ok(),
        );
    }

    /// `use_ai` switches AI judging on or off; `api_key` only fills a key
    /// missing from the file
    pub fn apply_overrides(&mut self, use_ai: Option<&str>, api_key: Option<String>) {
        if let Some(flag) = use_ai {
            self.ai.enabled = flag.trim().eq_ignore_ascii_case("true");
        }
        if self.ai.api_key.as_deref().is_none_or(str::is_empty) {
            if let Some(key) = api_key.filter(|k| !k.is_empty()) {
                self.ai.api_key = Some(key);
            }
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct JudgeConfig {
    pub workspace_root: Option<PathBuf>,
    pub compile_timeout: Millisecond,
    pub compile_output_limit: ByteSize,
    pub default_time_limit: Millisecond,
    pub default_memory_limit: Megabyte,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        let limits = StepLimits::default();
        Self {
            workspace_root: None,
            compile_timeout: Millisecond(limits.compile_timeout.as_millis() as u64),
            compile_output_limit: ByteSize(limits.compile_output_limit),
            default_time_limit: Millisecond(limits.default_time_limit_ms),
            default_memory_limit: Megabyte(limits.default_memory_limit_mb),
            workers: 2,
            queue_capacity: 64,
        }
    }
}

impl JudgeConfig {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("codejudge-workspaces"))
    }

    pub fn limits(&self) -> StepLimits {
        StepLimits {
            compile_timeout: self.compile_timeout.as_duration(),
            compile_output_limit: self.compile_output_limit.0,
            default_time_limit_ms: self.default_time_limit.0,
            default_memory_limit_mb: self.default_memory_limit.0,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AiConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Millisecond,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            api_key: None,
            timeout: Millisecond(30_000),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Falls back to the per-user data directory
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct UserConfig {
    pub id: i64,
    pub name: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ProblemConfig {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// 0 selects the judge's default
    #[serde(default)]
    pub time_limit: Millisecond,
    /// 0 selects the judge's default
    #[serde(default)]
    pub memory_limit: Megabyte,
    pub cases: Vec<CaseConfig>,
}

/// A test case given inline or as files relative to the configuration
#[derive(Deserialize, Debug, Clone)]
pub struct CaseConfig {
    pub input: Option<String>,
    pub input_file: Option<PathBuf>,
    pub expected_output: Option<String>,
    pub answer_file: Option<PathBuf>,
    #[serde(default)]
    pub hidden: bool,
}

impl CaseConfig {
    pub fn resolve(&self, base_dir: &Path) -> anyhow::Result<NewTestCase> {
        let input = read_inline_or_file(&self.input, &self.input_file, base_dir)
            .context("invalid test case input")?;
        let expected_output =
            read_inline_or_file(&self.expected_output, &self.answer_file, base_dir)
                .context("invalid test case answer")?;

        Ok(NewTestCase {
            input,
            expected_output,
            is_hidden: self.hidden,
        })
    }
}

fn read_inline_or_file(
    inline: &Option<String>,
    file: &Option<PathBuf>,
    base_dir: &Path,
) -> anyhow::Result<String> {
    match (inline, file) {
        (Some(text), None) => Ok(text.clone()),
        (None, Some(file)) => {
            let path = base_dir.join(file);
            std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))
        }
        (Some(_), Some(_)) => anyhow::bail!("both inline text and a file are given"),
        (None, None) => anyhow::bail!("neither inline text nor a file is given"),
    }
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Millisecond(pub u64);

impl Millisecond {
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.0)
    }
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Megabyte(pub u64);

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

/// Writes the configured users and problems into the store.
///
/// Existing rows are updated in place, so counters survive a restart.
pub async fn seed_store(
    config: &Config,
    store: &SqliteStore,
    base_dir: &Path,
) -> anyhow::Result<()> {
    for user in &config.users {
        store
            .upsert_user(user.id, &user.name)
            .await
            .with_context(|| format!("failed to seed user {}", user.id))?;
    }

    for problem in &config.problems {
        let cases = problem
            .cases
            .iter()
            .enumerate()
            .map(|(idx, case)| {
                case.resolve(base_dir)
                    .with_context(|| format!("problem {} case {}", problem.id, idx + 1))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        store
            .upsert_problem(
                problem.id,
                &problem.title,
                &problem.description,
                problem.time_limit.0,
                problem.memory_limit.0,
            )
            .await
            .with_context(|| format!("failed to seed problem {}", problem.id))?;
        store
            .replace_test_cases(problem.id, &cases)
            .await
            .with_context(|| format!("failed to seed test cases of problem {}", problem.id))?;

        log::info!(
            "Seeded problem {} \"{}\" with {} test cases",
            problem.id,
            problem.title,
            cases.len()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let config = Config::load("data/example.json").unwrap();
        assert_eq!(config.judge.workers, 2);
        assert_eq!(config.judge.default_time_limit, Millisecond(2000));
        assert!(!config.ai.enabled);
        assert_eq!(config.problems[0].id, 1);
        assert_eq!(config.problems[0].time_limit, Millisecond(1000));
        assert_eq!(config.problems[0].cases.len(), 3);
        assert!(config.problems[0].cases[2].hidden);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        let limits = config.judge.limits();
        assert_eq!(limits, StepLimits::default());
        assert_eq!(config.judge.queue_capacity, 64);
        assert_eq!(config.ai.timeout.as_duration(), Duration::from_secs(30));
        assert!(config.database.path.is_none());
        assert!(config.problems.is_empty());
    }

    #[test]
    fn environment_overrides() {
        let mut config = Config::default();
        config.apply_overrides(Some("true"), Some("from-env".into()));
        assert!(config.ai.enabled);
        assert_eq!(config.ai.api_key.as_deref(), Some("from-env"));

        config.ai.api_key = Some("from-file".into());
        config.apply_overrides(Some("false"), Some("from-env".into()));
        assert!(!config.ai.enabled);
        assert_eq!(config.ai.api_key.as_deref(), Some("from-file"));

        config.apply_overrides(None, None);
        assert!(!config.ai.enabled);
    }

    #[test]
    fn case_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1.ans"), "42\n").unwrap();

        let case: CaseConfig =
            serde_json::from_str(r#"{"input": "6 7\n", "answer_file": "1.ans"}"#).unwrap();
        let resolved = case.resolve(dir.path()).unwrap();
        assert_eq!(resolved.input, "6 7\n");
        assert_eq!(resolved.expected_output, "42\n");
        assert!(!resolved.is_hidden);

        let ambiguous: CaseConfig = serde_json::from_str(
            r#"{"input": "1", "input_file": "1.in", "expected_output": "1"}"#,
        )
        .unwrap();
        assert!(ambiguous.resolve(dir.path()).is_err());

        let missing: CaseConfig =
            serde_json::from_str(r#"{"input": "1", "answer_file": "nope.ans"}"#).unwrap();
        assert!(missing.resolve(dir.path()).is_err());
    }

    #[test]
    fn zero_workers_or_capacity_is_rejected() {
        let config: Config = serde_json::from_str(r#"{"judge": {"workers": 0}}"#).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("workers"), "{err}");

        let config: Config =
            serde_json::from_str(r#"{"judge": {"queue_capacity": 0}}"#).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("capacity"), "{err}");

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn thread_override_is_validated_too() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"judge": {"workers": 0}}"#).unwrap();

        let cli = CliArgs::parse_from(["codejudge", "-c", path.to_str().unwrap()]);
        assert!(cli.to_config().is_err());

        let cli = CliArgs::parse_from(["codejudge", "-c", path.to_str().unwrap(), "-t", "3"]);
        assert_eq!(cli.to_config().unwrap().judge.workers, 3);

        let cli = CliArgs::parse_from(["codejudge", "-c", path.to_str().unwrap(), "-t", "0"]);
        assert!(cli.to_config().is_err());
    }
}
