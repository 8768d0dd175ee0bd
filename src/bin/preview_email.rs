use anyhow::{anyhow, Context, Result};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

use camp_mailer::config;
use camp_mailer::manual;
use camp_mailer::model::Recipient;
use camp_mailer::render::render_message;
use camp_mailer::supabase::{ChildDirectory, SupabaseClient};

#[derive(Debug, Parser)]
#[command(
    about = "Write the email exactly as it would be sent to one recipient, as HTML (or raw MIME)"
)]
#[command(group(ArgGroup::new("source").required(true).args(["json", "child"])))]
struct Args {
    /// Path to YAML config file (only needed with --child)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// JSON recipients file; previews the item chosen with --index
    #[arg(long)]
    json: Option<PathBuf>,

    /// 1-based item of the JSON file to preview
    #[arg(long, default_value_t = 1)]
    index: usize,

    /// Child id from the database
    #[arg(long)]
    child: Option<String>,

    /// Output file (stdout when absent)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Emit the full MIME message instead of the HTML body
    #[arg(long)]
    mime: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let recipient = load_recipient(&args).await?;
    let message = render_message(&recipient);
    let output = if args.mime {
        message.to_mime()
    } else {
        message.html_body
    };

    match &args.out {
        Some(path) => {
            tokio::fs::write(path, output)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!(
                "preview for {} <{}> written to {}",
                recipient.recipient_name,
                recipient.recipient_email,
                path.display()
            );
        }
        None => println!("{output}"),
    }
    Ok(())
}

async fn load_recipient(args: &Args) -> Result<Recipient> {
    if let Some(path) = &args.json {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut recipients = manual::parse_recipients(&raw)?;
        if args.index == 0 || args.index > recipients.len() {
            return Err(anyhow!(
                "--index {} is out of range (1..={})",
                args.index,
                recipients.len()
            ));
        }
        return Ok(recipients.swap_remove(args.index - 1));
    }

    let id = args
        .child
        .as_deref()
        .ok_or_else(|| anyhow!("either --json or --child is required"))?;
    let cfg = config::load(Some(&args.config))?;
    let directory = SupabaseClient::from_config(&cfg.supabase)?;
    let child = directory
        .child_by_id(id)
        .await?
        .ok_or_else(|| anyhow!("child '{id}' not found"))?;
    Recipient::from_child(&child)
        .ok_or_else(|| anyhow!("child '{id}' has no valid parent name, email or QR code"))
}
