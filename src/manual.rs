//! Manual recipient input: a pasted JSON array validated as a whole.
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::Recipient;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://.+").expect("valid url regex"));

/// Every problem found in a rejected batch, in item order.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} validation error(s): {}", .0.len(), .0.join("; "))]
pub struct ValidationErrors(pub Vec<String>);

impl ValidationErrors {
    pub fn messages(&self) -> &[String] {
        &self.0
    }
}

pub fn is_valid_email(s: &str) -> bool {
    EMAIL_RE.is_match(s)
}

pub fn is_valid_url(s: &str) -> bool {
    URL_RE.is_match(s)
}

/// Parse raw JSON text into recipients. Either every item is accepted or the
/// whole batch is rejected with itemized messages.
pub fn parse_recipients(raw: &str) -> Result<Vec<Recipient>, ValidationErrors> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|_| ValidationErrors(vec!["Invalid JSON format".to_string()]))?;
    validate_recipients(&value)
}

/// Validate an already-parsed JSON value.
pub fn validate_recipients(value: &Value) -> Result<Vec<Recipient>, ValidationErrors> {
    let items = match value {
        Value::Array(items) => items,
        _ => return Err(ValidationErrors(vec!["Data must be an array".to_string()])),
    };
    if items.is_empty() {
        return Err(ValidationErrors(vec!["Array cannot be empty".to_string()]));
    }

    let empty = Map::new();
    let mut errors = Vec::new();
    let mut recipients = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let n = index + 1;
        let obj = item.as_object().unwrap_or(&empty);
        let before = errors.len();

        let email = required(obj, "parentEmail", n, &mut errors);
        if let Some(email) = email {
            if !is_valid_email(email) {
                errors.push(format!("Item {n}: parentEmail is not a valid email address"));
            }
        }
        let name = required(obj, "parentName", n, &mut errors);
        let children = required(obj, "childNames", n, &mut errors);
        let url = required(obj, "qrCodeUrl", n, &mut errors);
        if let Some(url) = url {
            if !is_valid_url(url) {
                errors.push(format!("Item {n}: qrCodeUrl must be a valid URL"));
            }
        }

        if errors.len() == before {
            if let (Some(email), Some(name), Some(children), Some(url)) = (email, name, children, url)
            {
                recipients.push(Recipient {
                    recipient_email: email.to_string(),
                    recipient_name: name.to_string(),
                    subject_names: children.to_string(),
                    attachment_url: url.to_string(),
                    recipient_id: obj
                        .get("childId")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(recipients)
    } else {
        Err(ValidationErrors(errors))
    }
}

fn required<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
    n: usize,
    errors: &mut Vec<String>,
) -> Option<&'a str> {
    match obj.get(field) {
        None | Some(Value::Null) => {
            errors.push(format!("Item {n}: {field} is required"));
            None
        }
        Some(Value::String(s)) if s.is_empty() => {
            errors.push(format!("Item {n}: {field} is required"));
            None
        }
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => {
            errors.push(format!("Item {n}: {field} must be a string"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_pattern() {
        assert!(is_valid_email("john.smith@example.com"));
        assert!(!is_valid_email("john smith@example.com"));
        assert!(!is_valid_email("john@example"));
        assert!(!is_valid_email("@example.com"));
    }

    #[test]
    fn url_pattern() {
        assert!(is_valid_url("https://x/y"));
        assert!(is_valid_url("http://qr.local/a.png"));
        assert!(!is_valid_url("https://"));
        assert!(!is_valid_url("ftp://x/y"));
    }

    #[test]
    fn non_object_item_reports_every_field() {
        let err = parse_recipients("[42]").unwrap_err();
        assert_eq!(err.messages().len(), 4);
        assert!(err.messages().iter().all(|m| m.starts_with("Item 1:")));
    }

    #[test]
    fn wrong_type_is_reported() {
        let err = parse_recipients(
            r#"[{"parentEmail":"a@b.com","parentName":7,"childNames":"C","qrCodeUrl":"https://x/y"}]"#,
        )
        .unwrap_err();
        assert_eq!(err.messages(), ["Item 1: parentName must be a string"]);
    }
}
