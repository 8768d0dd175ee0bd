use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use camp_mailer::config;
use camp_mailer::db;

#[derive(Debug, Parser)]
#[command(author, version, about = "Show the local history of bulk-send runs")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Show the per-recipient results of one run (id or prefix)
    #[arg(long)]
    run: Option<String>,

    /// Number of runs to list
    #[arg(long, default_value_t = 20)]
    limit: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;
    let pool = db::init_pool(&cfg.history_database_url()).await?;
    db::run_migrations(&pool).await?;

    let Some(run_ref) = args.run.as_deref() else {
        let runs = db::list_runs(&pool, args.limit).await?;
        if runs.is_empty() {
            println!("no runs recorded");
        }
        for run in runs {
            println!(
                "{}  {}  {:>4} sent {:>4} failed {:>4} total  {}",
                run.id,
                run.started_at.format("%Y-%m-%d %H:%M:%S"),
                run.sent,
                run.failed,
                run.total,
                run.source
            );
        }
        return Ok(());
    };

    let run = db::find_run(&pool, run_ref)
        .await?
        .ok_or_else(|| anyhow!("no run matches '{run_ref}'"))?;
    println!(
        "run {} ({}) {} -> {}",
        run.id,
        run.source,
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        run.finished_at.format("%H:%M:%S")
    );
    for item in db::run_items(&pool, &run.id).await? {
        println!(
            "{:>4}. {:<8} {:<32} {}{}",
            item.position + 1,
            item.status.state.as_str(),
            item.recipient.recipient_email,
            item.recipient.recipient_name,
            item.status
                .error
                .as_deref()
                .map(|e| format!("  ({e})"))
                .unwrap_or_default()
        );
    }
    Ok(())
}
