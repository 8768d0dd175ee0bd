//! Supabase (PostgREST) access: the child/parent directory and the `email_logs` sink.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Url};
use std::fmt;
use tracing::{debug, instrument};

use crate::config::{ConfigError, Supabase};
use crate::model::{LogStatus, Recipient};

pub mod model;

pub use model::{ChildWithParent, EmailLogRow, Parent};

const CHILD_SELECT: &str = "*,parent:parents(*)";

/// Read side: children joined with their parent.
#[async_trait]
pub trait ChildDirectory: Send + Sync {
    async fn children_with_parents(&self, search: Option<&str>) -> Result<Vec<ChildWithParent>>;

    async fn child_by_id(&self, id: &str) -> Result<Option<ChildWithParent>>;
}

/// Append-only record of send attempts.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn log_email(
        &self,
        recipient_id: &str,
        recipient_email: &str,
        status: LogStatus,
        error_message: Option<&str>,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    base_url: Url,
    anon_key: String,
}

impl fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SupabaseClient {
    /// Build a client from config; both the project URL and the anon key are required.
    pub fn from_config(cfg: &Supabase) -> Result<Self, ConfigError> {
        if cfg.url.trim().is_empty() {
            return Err(ConfigError::Missing("supabase.url (SUPABASE_URL)"));
        }
        if cfg.anon_key.trim().is_empty() {
            return Err(ConfigError::Missing("supabase.anon_key (SUPABASE_ANON_KEY)"));
        }
        let normalized = if cfg.url.ends_with('/') {
            cfg.url.clone()
        } else {
            format!("{}/", cfg.url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|_| ConfigError::Invalid("supabase.url is not a valid URL"))?;
        let http = Client::builder()
            .user_agent("camp-mailer/0.1")
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            base_url,
            anon_key: cfg.anon_key.clone(),
        })
    }

    fn table(&self, table: &str) -> Result<Url> {
        self.base_url
            .join(&format!("rest/v1/{table}"))
            .context("invalid Supabase base URL")
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
    }

    pub fn build_children_request(&self, search: Option<&str>) -> Result<reqwest::Request> {
        let mut query: Vec<(&str, String)> = vec![
            ("select", CHILD_SELECT.to_string()),
            ("order", "name.asc".to_string()),
        ];
        if let Some(filter) = search.and_then(name_filter) {
            query.push(("or", filter));
        }
        self.authorized(self.http.get(self.table("children")?))
            .query(&query)
            .build()
            .context("failed to build children request")
    }

    pub fn build_log_request(&self, row: &EmailLogRow<'_>) -> Result<reqwest::Request> {
        self.authorized(self.http.post(self.table("email_logs")?))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(row)
            .build()
            .context("failed to build email log request")
    }

    async fn fetch_rows<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::Request,
        what: &str,
    ) -> Result<Vec<T>> {
        debug!(url = %request.url(), "supabase request");
        let res = self
            .http
            .execute(request)
            .await
            .with_context(|| format!("failed to reach Supabase for {what}"))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to fetch {what}: {status}: {body}"));
        }
        res.json::<Vec<T>>()
            .await
            .with_context(|| format!("invalid Supabase response for {what}"))
    }

    pub async fn parent_by_id(&self, id: &str) -> Result<Option<Parent>> {
        let request = self
            .authorized(self.http.get(self.table("parents")?))
            .query(&[("select", "*".to_string()), ("id", format!("eq.{id}"))])
            .build()
            .context("failed to build parent request")?;
        let rows: Vec<Parent> = self.fetch_rows(request, "parent").await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl ChildDirectory for SupabaseClient {
    #[instrument(skip(self))]
    async fn children_with_parents(&self, search: Option<&str>) -> Result<Vec<ChildWithParent>> {
        let request = self.build_children_request(search)?;
        self.fetch_rows(request, "children").await
    }

    #[instrument(skip(self))]
    async fn child_by_id(&self, id: &str) -> Result<Option<ChildWithParent>> {
        let request = self
            .authorized(self.http.get(self.table("children")?))
            .query(&[("select", CHILD_SELECT.to_string()), ("id", format!("eq.{id}"))])
            .build()
            .context("failed to build child request")?;
        let rows: Vec<ChildWithParent> = self.fetch_rows(request, "child").await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl DeliveryLog for SupabaseClient {
    async fn log_email(
        &self,
        recipient_id: &str,
        recipient_email: &str,
        status: LogStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let row = email_log_row(recipient_id, recipient_email, status, error_message);
        let request = self.build_log_request(&row)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Supabase for email log")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to log email: {status}: {body}"));
        }
        Ok(())
    }
}

pub fn email_log_row<'a>(
    recipient_id: &'a str,
    recipient_email: &'a str,
    status: LogStatus,
    error_message: Option<&'a str>,
) -> EmailLogRow<'a> {
    EmailLogRow {
        child_id: recipient_id,
        parent_email: recipient_email,
        status: status.as_str(),
        error_message,
        email_type: "qr_code",
        sent_at: (status == LogStatus::Sent)
            .then(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    }
}

/// PostgREST `or=(...)` filter matching the term in any of the name columns.
/// Characters with meaning in the filter grammar are dropped from the term.
fn name_filter(term: &str) -> Option<String> {
    let cleaned: String = term
        .chars()
        .filter(|c| !matches!(*c, ',' | '(' | ')' | '*' | '%' | '"'))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    Some(format!(
        "(name.ilike.*{cleaned}*,first_name.ilike.*{cleaned}*,last_name.ilike.*{cleaned}*)"
    ))
}

/// Local search over an already loaded list: child name, parent name or parent email.
pub fn filter_children<'a>(children: &'a [ChildWithParent], term: &str) -> Vec<&'a ChildWithParent> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return children.iter().collect();
    }
    children
        .iter()
        .filter(|child| {
            let parent_name = child.parent.as_ref().map(|p| p.name.as_str()).unwrap_or("");
            let parent_email = child
                .parent
                .as_ref()
                .and_then(|p| p.email.as_deref())
                .unwrap_or("");
            child.display_name().to_lowercase().contains(&needle)
                || parent_name.to_lowercase().contains(&needle)
                || parent_email.to_lowercase().contains(&needle)
        })
        .collect()
}

impl Recipient {
    /// Project a directory row; rows failing [`ChildWithParent::can_email`] yield `None`.
    pub fn from_child(child: &ChildWithParent) -> Option<Recipient> {
        if !child.can_email() {
            return None;
        }
        let email = child.parent_email()?;
        let qr = child.qr_url()?;
        let parent = child.parent.as_ref()?;
        Some(Recipient {
            recipient_email: email.to_string(),
            recipient_name: parent.name.clone(),
            subject_names: child.display_name(),
            attachment_url: qr.to_string(),
            recipient_id: Some(child.id.clone()),
        })
    }
}
