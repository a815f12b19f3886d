//! Conversion of a DATA payload into the send-message request.

use crate::api::{OutgoingAttachment, OutgoingMessage, Recipient};
use crate::model::translate_recipient;
use base64::Engine;
use mail_parser::{MessageParser, MimeHeaders};
use std::collections::HashMap;
use thiserror::Error;

const NO_SUBJECT: &str = "(no subject)";

/// Payload that cannot be turned into a message; retrying cannot help
#[derive(Debug, Error, PartialEq)]
pub enum MimeError {
    #[error("empty message")]
    Empty,

    #[error("message is not valid MIME")]
    Unparseable,
}

/// Build the upstream send request from a raw RFC 5322 message.
///
/// `rcpt_to` are the envelope recipients as the client gave them; each is
/// translated to a delivery address and named after the matching To/Cc entry.
pub fn build_outgoing(raw: &[u8], rcpt_to: &[String]) -> Result<OutgoingMessage, MimeError> {
    if raw.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(MimeError::Empty);
    }

    let message = MessageParser::default()
        .parse(raw)
        .ok_or(MimeError::Unparseable)?;

    let mut names: HashMap<String, String> = HashMap::new();
    for addr in [message.to(), message.cc()].into_iter().flatten() {
        for a in addr.iter() {
            if let (Some(address), Some(name)) = (a.address.as_deref(), a.name.as_deref()) {
                if !name.is_empty() {
                    names.insert(address.to_ascii_lowercase(), name.to_string());
                }
            }
        }
    }

    let recipients = rcpt_to
        .iter()
        .map(|address| Recipient {
            address: translate_recipient(address),
            name: names.get(&address.to_ascii_lowercase()).cloned(),
        })
        .collect();

    let plain = message
        .text_bodies()
        .find(|part| part.is_text() && !part.is_text_html())
        .and_then(|part| part.text_contents())
        .map(|s| s.to_string());
    let html = message
        .html_bodies()
        .find(|part| part.is_text_html())
        .and_then(|part| part.text_contents())
        .map(|s| s.to_string());

    // Plain text goes to `content`; HTML stands in for it only when there is no plain part
    let (content, content_html) = match (plain, html) {
        (Some(plain), html) => (plain, html),
        (None, Some(html)) => (html, None),
        (None, None) => (String::new(), None),
    };

    let attachments = message
        .attachments()
        .filter(|part| {
            part.content_disposition()
                .is_some_and(|cd| cd.is_attachment())
        })
        .filter(|part| !part.contents().is_empty())
        .map(|part| OutgoingAttachment {
            filename: part.attachment_name().unwrap_or("attachment").to_string(),
            content_type: part
                .content_type()
                .map(|ct| {
                    format!(
                        "{}/{}",
                        ct.ctype(),
                        ct.subtype().unwrap_or("octet-stream")
                    )
                    .to_ascii_lowercase()
                })
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            content: base64::engine::general_purpose::STANDARD.encode(part.contents()),
        })
        .collect();

    Ok(OutgoingMessage {
        recipients,
        subject: message.subject().unwrap_or(NO_SUBJECT).to_string(),
        content,
        content_html,
        attachments,
    })
}
