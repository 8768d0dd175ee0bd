use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use camp_mailer::config::{self, Config};
use camp_mailer::db::{self, NewRun};
use camp_mailer::manual;
use camp_mailer::model::{Recipient, SendState};
use camp_mailer::pipeline::{send_batch, BatchTracker};
use camp_mailer::relay::RelayClient;
use camp_mailer::render::render_message;
use camp_mailer::supabase::{ChildDirectory, DeliveryLog, SupabaseClient};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Send the camp QR-code email to a batch of parents, one at a time"
)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["json", "child", "search", "all", "retry_run"])
))]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// JSON file with an array of {parentEmail, parentName, childNames, qrCodeUrl[, childId]}
    #[arg(long)]
    json: Option<PathBuf>,

    /// Child id from the database (repeatable)
    #[arg(long)]
    child: Vec<String>,

    /// Every emailable child whose name matches this term
    #[arg(long)]
    search: Option<String>,

    /// Every emailable child in the database
    #[arg(long)]
    all: bool,

    /// Resend only the failed recipients of a previous run (id or prefix)
    #[arg(long)]
    retry_run: Option<String>,

    /// Pause between two sends in milliseconds (defaults to app.delay_ms)
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Render every message and list the batch without sending
    #[arg(long)]
    dry_run: bool,
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

    // Credentials are checked before anything is fetched or sent.
    let relay = if args.dry_run {
        None
    } else {
        Some(RelayClient::from_config(&cfg.relay)?)
    };

    let pool = db::init_pool(&cfg.history_database_url()).await?;
    db::run_migrations(&pool).await?;

    let (source, recipients) = collect_recipients(&args, &cfg, &pool).await?;
    if recipients.is_empty() {
        info!(%source, "no eligible recipients, nothing to send");
        return Ok(());
    }

    if args.dry_run {
        for (i, r) in recipients.iter().enumerate() {
            let msg = render_message(r);
            println!(
                "{:>3}. {} <{}> [{}] {} bytes",
                i + 1,
                r.recipient_name,
                r.recipient_email,
                r.subject_names,
                msg.to_mime().len()
            );
        }
        println!("dry run: {} message(s) rendered, none sent", recipients.len());
        return Ok(());
    }
    let relay = relay.ok_or_else(|| anyhow!("mail relay not configured"))?;

    let delivery_log = match SupabaseClient::from_config(&cfg.supabase) {
        Ok(client) => Some(client),
        Err(err) => {
            warn!(%err, "delivery log disabled");
            None
        }
    };
    let delay = args
        .delay_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| cfg.delay());

    info!(%source, total = recipients.len(), delay_ms = delay.as_millis() as u64, "starting batch");
    let started_at = Utc::now();
    let mut tracker = BatchTracker::new(&recipients);
    let statuses = send_batch(
        &recipients,
        &relay,
        delivery_log.as_ref().map(|c| c as &dyn DeliveryLog),
        delay,
        |status| {
            tracker.apply(status);
            match status.state {
                SendState::Sending => println!(
                    "[{}/{}] sending to {} <{}>",
                    tracker.position(),
                    tracker.entries(),
                    status.recipient_name,
                    status.recipient_email
                ),
                SendState::Success => println!("        ok   {}", status.recipient_email),
                SendState::Error => println!(
                    "        FAIL {}: {}",
                    status.recipient_email,
                    status.error.as_deref().unwrap_or("unknown error")
                ),
                SendState::Pending => {}
            }
        },
    )
    .await;
    let finished_at = Utc::now();

    let sent = statuses
        .iter()
        .filter(|s| s.state == SendState::Success)
        .count();
    let failed = statuses.len() - sent;
    println!(
        "done: {sent} sent, {failed} failed, {} total",
        statuses.len()
    );

    let run = NewRun {
        source,
        started_at,
        finished_at,
    };
    match db::save_run(&pool, &run, &recipients, &statuses).await {
        Ok(run_id) => {
            println!("run id: {run_id}");
            if failed > 0 {
                println!("resend failures with: camp-mailer --retry-run {run_id}");
            }
        }
        Err(err) => warn!(?err, "failed to save run history"),
    }
    Ok(())
}

async fn collect_recipients(
    args: &Args,
    cfg: &Config,
    pool: &db::Pool,
) -> Result<(String, Vec<Recipient>)> {
    if let Some(path) = &args.json {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        return match manual::parse_recipients(&raw) {
            Ok(recipients) => Ok((format!("manual:{}", path.display()), recipients)),
            Err(errors) => {
                for msg in errors.messages() {
                    eprintln!("  - {msg}");
                }
                Err(errors.into())
            }
        };
    }

    if let Some(run_ref) = &args.retry_run {
        let run = db::find_run(pool, run_ref)
            .await?
            .ok_or_else(|| anyhow!("no run matches '{run_ref}'"))?;
        let failed = db::failed_recipients(pool, &run.id).await?;
        return Ok((format!("retry:{}", run.id), failed));
    }

    let directory = SupabaseClient::from_config(&cfg.supabase)?;
    let children = if !args.child.is_empty() {
        let mut rows = Vec::with_capacity(args.child.len());
        for id in &args.child {
            match directory.child_by_id(id).await? {
                Some(child) => rows.push(child),
                None => bail!("child '{id}' not found"),
            }
        }
        rows
    } else {
        directory
            .children_with_parents(args.search.as_deref())
            .await?
    };

    let total = children.len();
    let recipients: Vec<Recipient> = children.iter().filter_map(Recipient::from_child).collect();
    if recipients.len() < total {
        warn!(
            skipped = total - recipients.len(),
            "children without a valid parent name, email or QR code were skipped"
        );
    }
    Ok(("database".to_string(), recipients))
}
