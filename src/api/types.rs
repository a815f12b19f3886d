use crate::model::{AttachmentInfo, Folder, Message, MessageStatus};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn default_expires_in() -> i64 {
    3600
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiParty {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiAttachment {
    #[serde(default, alias = "id")]
    pub attachment_id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
}

/// Message as returned by the list and detail endpoints
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiMessage {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub sender: ApiParty,
    #[serde(default)]
    pub recipients: Vec<ApiParty>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub content_html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<ApiAttachment>,
    #[serde(default)]
    pub received_at: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
}

impl ApiMessage {
    /// Folder named by the message itself, when it is one the gateway maps
    pub fn folder(&self) -> Option<Folder> {
        self.folder.as_deref().and_then(Folder::from_api_name)
    }

    pub fn into_message(self, folder: Folder) -> Message {
        let status = self
            .status
            .as_deref()
            .map(MessageStatus::parse)
            .unwrap_or(MessageStatus::Received);

        Message {
            id: self.message_id,
            subject: self
                .subject
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "(no subject)".to_string()),
            sender: self.sender.address,
            sender_name: self.sender.name.filter(|n| !n.is_empty()),
            recipients: self.recipients.into_iter().map(|r| r.address).collect(),
            content: self.content.unwrap_or_default(),
            content_html: self.content_html,
            attachments: self
                .attachments
                .into_iter()
                .map(|a| AttachmentInfo {
                    id: a.attachment_id,
                    filename: a.filename,
                    content_type: a.content_type,
                    size: a.size,
                })
                .collect(),
            received_at: parse_timestamp(self.received_at.as_deref()),
            status,
            folder,
            flags: status.to_flags(),
        }
    }
}

/// Parse RFC 3339 or a naive ISO-8601 timestamp (taken as UTC); falls back to now
fn parse_timestamp(value: Option<&str>) -> DateTime<Utc> {
    let Some(value) = value else {
        return Utc::now();
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return dt.with_timezone(&Utc);
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// List endpoint response
#[derive(Debug, Deserialize)]
pub(crate) struct MessageList {
    #[serde(default)]
    pub messages: Vec<ApiMessage>,
}

/// The detail endpoint answers with an object or a one-element array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum MessageDetail {
    One(ApiMessage),
    Many(Vec<ApiMessage>),
}

impl MessageDetail {
    pub fn into_single(self) -> Option<ApiMessage> {
        match self {
            MessageDetail::One(m) => Some(m),
            MessageDetail::Many(list) => list.into_iter().next(),
        }
    }
}

/// Paging and filtering for message listings
#[derive(Debug, Clone, PartialEq)]
pub struct MessageQuery {
    pub limit: u32,
    pub offset: u32,
    pub since: Option<DateTime<Utc>>,
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            since: None,
        }
    }
}

/// Recipient of an outgoing message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipient {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Attachment of an outgoing message, content already base64-encoded
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingAttachment {
    pub filename: String,
    pub content_type: String,
    pub content: String,
}

/// Body of the send-message call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub recipients: Vec<Recipient>,
    pub subject: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_html: Option<String>,
    pub attachments: Vec<OutgoingAttachment>,
}

/// Result of a successful send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusUpdate<'a> {
    pub status: &'a str,
}

/// Downloaded attachment
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentData {
    pub content: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}
