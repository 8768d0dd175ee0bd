use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use camp_mailer::config;
use camp_mailer::supabase::{filter_children, ChildDirectory, SupabaseClient};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "List children with their parent and whether the QR email can be sent"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Server-side search on the child name columns
    #[arg(long)]
    search: Option<String>,

    /// Local filter on child name, parent name or parent email
    #[arg(long)]
    filter: Option<String>,

    /// Only show children that can be emailed
    #[arg(long)]
    emailable: bool,

    /// Show one parent's contact details and only their children
    #[arg(long)]
    parent: Option<String>,
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
    let directory = SupabaseClient::from_config(&cfg.supabase)?;

    let mut children = directory
        .children_with_parents(args.search.as_deref())
        .await?;
    if let Some(parent_id) = args.parent.as_deref() {
        let parent = directory
            .parent_by_id(parent_id)
            .await?
            .ok_or_else(|| anyhow!("parent '{parent_id}' not found"))?;
        println!(
            "parent {}  {}  {}  phone: {}  church: {}",
            parent.id,
            parent.name,
            parent.email.as_deref().unwrap_or("(no email)"),
            parent.phone_number.as_deref().unwrap_or("-"),
            parent.church.as_deref().unwrap_or("-")
        );
        children.retain(|c| {
            let id = c.parent_id.as_deref().or(c.parent.as_ref().map(|p| p.id.as_str()));
            id == Some(parent.id.as_str())
        });
    }
    let shown = filter_children(&children, args.filter.as_deref().unwrap_or(""));

    let mut emailable = 0;
    for child in shown.iter().filter(|c| !args.emailable || c.can_email()) {
        let ok = child.can_email();
        if ok {
            emailable += 1;
        }
        let parent = child.parent.as_ref();
        println!(
            "{}  {:<28} parent: {:<24} {:<32} {}",
            child.id,
            child.display_name(),
            parent.map(|p| p.name.as_str()).unwrap_or("-"),
            child.parent_email().unwrap_or("(no email)"),
            if ok { "ready" } else { "invalid parent name, email or QR code" }
        );
    }
    println!(
        "{} children shown, {} ready to email ({} loaded)",
        shown.iter().filter(|c| !args.emailable || c.can_email()).count(),
        emailable,
        children.len()
    );
    Ok(())
}
