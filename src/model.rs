use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One send target: a parent and the child (or children) the email is about.
///
/// Field names on the wire follow the JSON accepted by the manual input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    #[serde(rename = "parentEmail")]
    pub recipient_email: String,
    #[serde(rename = "parentName")]
    pub recipient_name: String,
    #[serde(rename = "childNames")]
    pub subject_names: String,
    #[serde(rename = "qrCodeUrl")]
    pub attachment_url: String,
    #[serde(rename = "childId", default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SendState {
    Pending,
    Sending,
    Success,
    Error,
}

impl SendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendState::Pending => "pending",
            SendState::Sending => "sending",
            SendState::Success => "success",
            SendState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SendState::Pending),
            "sending" => Some(SendState::Sending),
            "success" => Some(SendState::Success),
            "error" => Some(SendState::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SendState::Success | SendState::Error)
    }
}

/// Delivery outcome for one recipient of a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendStatus {
    pub recipient_email: String,
    pub recipient_name: String,
    pub state: SendState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl SendStatus {
    fn with_state(recipient: &Recipient, state: SendState) -> Self {
        Self {
            recipient_email: recipient.recipient_email.clone(),
            recipient_name: recipient.recipient_name.clone(),
            state,
            error: None,
            response: None,
        }
    }

    pub fn pending(recipient: &Recipient) -> Self {
        Self::with_state(recipient, SendState::Pending)
    }

    pub fn sending(recipient: &Recipient) -> Self {
        Self::with_state(recipient, SendState::Sending)
    }

    pub fn success(recipient: &Recipient, response: Value) -> Self {
        Self {
            response: Some(response),
            ..Self::with_state(recipient, SendState::Success)
        }
    }

    pub fn failed(recipient: &Recipient, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_state(recipient, SendState::Error)
        }
    }
}

/// Aggregate counts over a batch. Always derived from the per-email statuses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchProgress {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub current: Option<String>,
}

impl BatchProgress {
    /// Every tracked email has a terminal status. `total` counts distinct
    /// emails, so with a repeated address this turns true after that address's
    /// first result, while later entries of the batch may still be in flight.
    pub fn is_finished(&self) -> bool {
        self.sent + self.failed == self.total
    }
}

/// Status values accepted by the `email_logs` table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Sent,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Sent => "sent",
            LogStatus::Failed => "failed",
        }
    }
}
