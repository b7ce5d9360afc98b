use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use codejudge::config::{self, CliArgs};
use codejudge::database::{self as db, SqliteStore};
use codejudge::model::Verdict;
use codejudge::orchestrator::Orchestrator;
use codejudge::queue::{JudgeQueue, JudgeTask};
use codejudge::worker::worker;

struct Pending {
    source: PathBuf,
    submission_id: i64,
    verdict: oneshot::Receiver<Verdict>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = cli.to_config().context("Failed to load configuration")?;

    let db_path = match &config.database.path {
        Some(path) => path.clone(),
        None => db::get_db_path().context("Failed to locate database")?,
    };
    if cli.flush_data {
        db::remove_db(&db_path);
    }

    let db_pool = db::init_db(&db_path)
        .await
        .context("Failed to initialize database")?;
    let store = Arc::new(SqliteStore::new(db_pool));
    config::seed_store(&config, &store, &cli.config_dir()).await?;

    if cli.sources.is_empty() {
        log::info!("No source files given, nothing to judge");
        return Ok(());
    }
    let (Some(problem_id), Some(language)) = (cli.problem, cli.language.as_deref()) else {
        anyhow::bail!("--problem and --language are required to judge source files");
    };

    let orchestrator = Arc::new(Orchestrator::from_config(
        &config.judge,
        &config.ai,
        store.clone(),
    )?);
    log::info!("Judging strategies: {:?}", orchestrator.strategy_names());

    let queue = Arc::new(JudgeQueue::new(config.judge.queue_capacity));
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for i in 1..=config.judge.workers {
        workers.spawn(worker(
            i,
            store.clone(),
            orchestrator.clone(),
            queue.clone(),
            shutdown_token.clone(),
        ));
    }

    let mut pending = Vec::with_capacity(cli.sources.len());
    for source in &cli.sources {
        let code = std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read {}", source.display()))?;
        let submission_id = store
            .create_submission(cli.user, problem_id, &code, language)
            .await
            .with_context(|| format!("Failed to submit {}", source.display()))?;

        let (task, verdict) = JudgeTask::blocking(submission_id);
        if let Err(e) = queue.push(task) {
            log::error!("{e}, {} skipped", source.display());
            continue;
        }
        log::info!("Submitted {} as submission {submission_id}", source.display());

        pending.push(Pending {
            source: source.clone(),
            submission_id,
            verdict,
        });
    }

    // ===== EXECUTION END, WAITING FOR VERDICTS ======

    let report = async {
        for Pending {
            source,
            submission_id,
            verdict,
        } in pending
        {
            match verdict.await {
                Ok(verdict) => {
                    let output = serde_json::json!({
                        "source": source.display().to_string(),
                        "submissionId": submission_id,
                        "verdict": verdict,
                    });
                    match serde_json::to_string_pretty(&output) {
                        Ok(text) => println!("{text}"),
                        Err(e) => log::error!("Failed to print verdict of {submission_id}: {e}"),
                    }
                }
                Err(_) => log::error!("Submission {submission_id} was dropped without a verdict"),
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A worker terminated unexpectedly: {:?}", res_worker);
        }
        _ = report => {
            log::info!("All submissions judged");
        }
    }

    // 1. Broadcast shutdown signal to workers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 2. Wait until every worker terminates
    while let Some(res) = workers.join_next().await {
        match res {
            Ok(Err(e)) => log::error!("Worker finished with error: {e:?}"),
            Err(e) if e.is_panic() => log::error!("Worker handle panicked: {e:?}"),
            Err(e) => log::error!("Worker handle finished with error: {e:?}"),
            Ok(Ok(())) => {}
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
