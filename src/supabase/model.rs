use serde::{Deserialize, Serialize};

use crate::manual::{is_valid_email, is_valid_url};

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Parent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    pub church: Option<String>,
    pub created_at: Option<String>,
}

/// A `children` row with its `parent:parents(*)` embed.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ChildWithParent {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<i32>,
    pub qr_code_url: Option<String>,
    pub parent_id: Option<String>,
    pub checked_in: Option<bool>,
    pub payment_status: Option<String>,
    pub created_at: Option<String>,
    #[serde(default)]
    pub parent: Option<Parent>,
}

impl ChildWithParent {
    /// `name`, else the non-empty name parts joined by spaces, else a placeholder.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        let joined = [&self.first_name, &self.middle_name, &self.last_name]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() {
            "Unknown Child".to_string()
        } else {
            joined
        }
    }

    pub fn parent_email(&self) -> Option<&str> {
        self.parent
            .as_ref()
            .and_then(|p| p.email.as_deref())
            .filter(|e| !e.is_empty())
    }

    pub fn qr_url(&self) -> Option<&str> {
        self.qr_code_url.as_deref().filter(|u| !u.is_empty())
    }

    /// Whether this row makes a valid recipient: a named parent with a
    /// well-formed email and an http(s) QR code URL, same rules as manual input.
    pub fn can_email(&self) -> bool {
        let named = self
            .parent
            .as_ref()
            .is_some_and(|p| !p.name.trim().is_empty());
        named
            && self.parent_email().is_some_and(is_valid_email)
            && self.qr_url().is_some_and(is_valid_url)
    }
}

/// Row inserted into `email_logs`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EmailLogRow<'a> {
    pub child_id: &'a str,
    pub parent_email: &'a str,
    pub status: &'static str,
    pub error_message: Option<&'a str>,
    pub email_type: &'static str,
    pub sent_at: Option<String>,
}
