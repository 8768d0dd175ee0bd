//! Email rendering. The same [`RenderedMessage`] feeds the preview and the relay.
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::model::Recipient;

pub const SUBJECT: &str = "Important: Rhema Youth Camp 2025 Check-in & Pick-up Info";

const TEMPLATE: &str = include_str!("../templates/camp_email.html");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

impl RenderedMessage {
    /// RFC 822 style message: headers, blank line, HTML body.
    pub fn to_mime(&self) -> String {
        let mut out = String::with_capacity(self.html_body.len() + 160);
        out.push_str("To: ");
        out.push_str(&self.to);
        out.push_str("\r\nSubject: ");
        out.push_str(&self.subject);
        out.push_str("\r\nContent-Type: text/html; charset=UTF-8\r\n\r\n");
        out.push_str(&self.html_body);
        out
    }

    /// base64url (no padding) of the UTF-8 MIME text, as the relay expects in `raw`.
    pub fn encode_raw(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_mime().as_bytes())
    }
}

pub fn render_message(recipient: &Recipient) -> RenderedMessage {
    RenderedMessage {
        to: recipient.recipient_email.clone(),
        subject: SUBJECT.to_string(),
        html_body: render_body(recipient),
    }
}

pub fn render_body(recipient: &Recipient) -> String {
    let download_name = download_name(&recipient.subject_names);
    fill(TEMPLATE, |key| match key {
        "parent_name" => Some(recipient.recipient_name.as_str()),
        "child_names" => Some(recipient.subject_names.as_str()),
        "qr_code_url" => Some(recipient.attachment_url.as_str()),
        "download_name" => Some(download_name.as_str()),
        _ => None,
    })
}

/// File-name-safe form of the child names: every non-alphanumeric ASCII char becomes `-`.
pub fn download_name(names: &str) -> String {
    names
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Single pass over `template`; substituted values are never scanned again.
fn fill<'a, F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<&'a str>,
{
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = &after[..end];
                match lookup(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
