//! Rows of the run history. Business logic stays in the pipeline and binaries.

use chrono::{DateTime, Utc};

use crate::model::{Recipient, SendStatus};

/// Header of a batch about to be saved.
#[derive(Debug, Clone)]
pub struct NewRun {
    /// Where the recipients came from, e.g. `database`, `manual:<file>`, `retry:<run id>`.
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub id: String,
    pub source: String,
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// One recipient of a saved run with its terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct RunItem {
    pub position: i64,
    pub recipient: Recipient,
    pub status: SendStatus,
}
