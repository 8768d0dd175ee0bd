//! Sequential bulk send: one recipient at a time, failures recorded and skipped over.
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::model::{BatchProgress, LogStatus, Recipient, SendState, SendStatus};
use crate::relay::MailTransport;
use crate::render::render_message;
use crate::supabase::DeliveryLog;

/// Send every recipient in order and return one terminal status per recipient.
///
/// `on_progress` sees a `sending` status followed by exactly one `success` or
/// `error` status for each recipient. A failed recipient never stops the batch.
/// When `delay` is non-zero the pipeline sleeps between two consecutive sends
/// (not after the last one).
#[instrument(skip_all, fields(total = recipients.len()))]
pub async fn send_batch<F>(
    recipients: &[Recipient],
    transport: &dyn MailTransport,
    delivery_log: Option<&dyn DeliveryLog>,
    delay: Duration,
    mut on_progress: F,
) -> Vec<SendStatus>
where
    F: FnMut(&SendStatus),
{
    let mut results = Vec::with_capacity(recipients.len());

    for (index, recipient) in recipients.iter().enumerate() {
        on_progress(&SendStatus::sending(recipient));

        let message = render_message(recipient);
        let status = match transport.send(&message).await {
            Ok(response) => {
                info!(to = %recipient.recipient_email, "email sent");
                record(delivery_log, recipient, LogStatus::Sent, None).await;
                SendStatus::success(recipient, response)
            }
            Err(err) => {
                let error = err.to_string();
                warn!(to = %recipient.recipient_email, %error, "email failed");
                record(delivery_log, recipient, LogStatus::Failed, Some(&error)).await;
                SendStatus::failed(recipient, error)
            }
        };

        on_progress(&status);
        results.push(status);

        if !delay.is_zero() && index + 1 < recipients.len() {
            tokio::time::sleep(delay).await;
        }
    }

    results
}

/// Best effort: a log failure is reported and otherwise ignored.
async fn record(
    delivery_log: Option<&dyn DeliveryLog>,
    recipient: &Recipient,
    status: LogStatus,
    error: Option<&str>,
) {
    let (Some(log), Some(id)) = (delivery_log, recipient.recipient_id.as_deref()) else {
        return;
    };
    if let Err(err) = log
        .log_email(id, &recipient.recipient_email, status, error)
        .await
    {
        warn!(?err, recipient_id = id, "failed to write delivery log");
    }
}

/// Latest status per recipient email, with the aggregate recomputed on every update.
///
/// Only the pipeline callback writes into the tracker; readers get snapshots.
#[derive(Debug, Clone, Default)]
pub struct BatchTracker {
    entries: usize,
    started: usize,
    total: usize,
    statuses: HashMap<String, SendStatus>,
    progress: BatchProgress,
}

impl BatchTracker {
    /// Entries are keyed by email, so the total counts distinct addresses.
    pub fn new(recipients: &[Recipient]) -> Self {
        let total = recipients
            .iter()
            .map(|r| r.recipient_email.as_str())
            .collect::<HashSet<_>>()
            .len();
        let statuses = recipients
            .iter()
            .map(|r| (r.recipient_email.clone(), SendStatus::pending(r)))
            .collect();
        Self {
            entries: recipients.len(),
            started: 0,
            total,
            statuses,
            progress: BatchProgress {
                total,
                ..Default::default()
            },
        }
    }

    /// Replace the entry for this email and return the refreshed aggregate.
    pub fn apply(&mut self, status: &SendStatus) -> &BatchProgress {
        if status.state == SendState::Sending {
            self.started += 1;
        }
        self.statuses
            .insert(status.recipient_email.clone(), status.clone());

        let mut sent = 0;
        let mut failed = 0;
        for s in self.statuses.values() {
            match s.state {
                SendState::Success => sent += 1,
                SendState::Error => failed += 1,
                SendState::Pending | SendState::Sending => {}
            }
        }
        let current = match status.state {
            SendState::Sending => Some(status.recipient_name.clone()),
            _ => None,
        };
        self.progress = BatchProgress {
            total: self.total,
            sent,
            failed,
            current,
        };
        &self.progress
    }

    /// 1-based input position of the entry being sent; 0 before the first send.
    /// Counts batch entries, so a repeated email still advances it.
    pub fn position(&self) -> usize {
        self.started
    }

    /// Number of batch entries, duplicates included.
    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn progress(&self) -> &BatchProgress {
        &self.progress
    }

    pub fn status(&self, email: &str) -> Option<&SendStatus> {
        self.statuses.get(email)
    }

    /// Emails whose latest state is `error`.
    pub fn failed_emails(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .statuses
            .values()
            .filter(|s| s.state == SendState::Error)
            .map(|s| s.recipient_email.as_str())
            .collect();
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn r(email: &str, name: &str) -> Recipient {
        Recipient {
            recipient_email: email.into(),
            recipient_name: name.into(),
            subject_names: "Kid".into(),
            attachment_url: "https://qr/1".into(),
            recipient_id: None,
        }
    }

    #[test]
    fn tracker_replaces_by_email() {
        let batch = vec![r("a@x.com", "A"), r("b@x.com", "B")];
        let mut t = BatchTracker::new(&batch);
        assert_eq!(t.progress().total, 2);

        let p = t.apply(&SendStatus::sending(&batch[0])).clone();
        assert_eq!(p.current.as_deref(), Some("A"));
        assert_eq!((p.sent, p.failed), (0, 0));

        let p = t.apply(&SendStatus::success(&batch[0], json!({}))).clone();
        assert_eq!((p.sent, p.failed, p.current), (1, 0, None));

        t.apply(&SendStatus::sending(&batch[1]));
        let p = t.apply(&SendStatus::failed(&batch[1], "nope")).clone();
        assert_eq!((p.sent, p.failed), (1, 1));
        assert!(p.is_finished());
        assert_eq!(t.failed_emails(), ["b@x.com"]);
        assert_eq!(t.status("b@x.com").unwrap().error.as_deref(), Some("nope"));
    }

    #[test]
    fn duplicate_emails_collapse_to_one_entry() {
        let batch = vec![r("a@x.com", "A"), r("a@x.com", "A again")];
        let mut t = BatchTracker::new(&batch);
        assert_eq!(t.progress().total, 1);
        t.apply(&SendStatus::failed(&batch[0], "first"));
        let p = t.apply(&SendStatus::success(&batch[1], json!(null))).clone();
        assert_eq!((p.sent, p.failed), (1, 0));
        assert!(p.sent + p.failed <= p.total);
    }

    #[test]
    fn position_follows_input_entries_with_duplicate_emails() {
        let batch = vec![r("a@x.com", "A"), r("a@x.com", "A again"), r("b@x.com", "B")];
        let mut t = BatchTracker::new(&batch);
        assert_eq!((t.position(), t.entries()), (0, 3));

        t.apply(&SendStatus::sending(&batch[0]));
        t.apply(&SendStatus::success(&batch[0], json!({})));
        t.apply(&SendStatus::sending(&batch[1]));
        assert_eq!(t.position(), 2);
        assert!(t.position() <= t.entries());

        t.apply(&SendStatus::success(&batch[1], json!({})));
        t.apply(&SendStatus::sending(&batch[2]));
        assert_eq!(t.position(), 3);
        assert!(!t.progress().is_finished());
        t.apply(&SendStatus::failed(&batch[2], "x"));
        assert_eq!(t.position(), t.entries());
        assert!(t.progress().is_finished());
    }

    #[test]
    fn empty_tracker_is_finished() {
        let t = BatchTracker::new(&[]);
        assert!(t.progress().is_finished());
    }
}
