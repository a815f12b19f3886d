//! In-memory representation of delivery messages and their IMAP view.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Mail domain used when an e-Doręczenia address has to look like an email address
pub const ADE_MAIL_DOMAIN: &str = "edoreczenia.gov.pl";

/// Delivery status as reported by the upstream API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Received,
    Read,
    Opened,
    Replied,
    Sent,
    Archived,
    Deleted,
    /// Only ever sent upstream, when a client clears \Seen
    Unread,
}

impl MessageStatus {
    /// Parse an upstream status string. Unknown values count as RECEIVED.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "READ" => MessageStatus::Read,
            "OPENED" => MessageStatus::Opened,
            "REPLIED" => MessageStatus::Replied,
            "SENT" => MessageStatus::Sent,
            "ARCHIVED" => MessageStatus::Archived,
            "DELETED" => MessageStatus::Deleted,
            "UNREAD" => MessageStatus::Unread,
            _ => MessageStatus::Received,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Received => "RECEIVED",
            MessageStatus::Read => "READ",
            MessageStatus::Opened => "OPENED",
            MessageStatus::Replied => "REPLIED",
            MessageStatus::Sent => "SENT",
            MessageStatus::Archived => "ARCHIVED",
            MessageStatus::Deleted => "DELETED",
            MessageStatus::Unread => "UNREAD",
        }
    }

    /// IMAP flags implied by this status
    pub fn to_flags(self) -> MessageFlags {
        MessageFlags {
            seen: matches!(self, MessageStatus::Read | MessageStatus::Opened),
            answered: self == MessageStatus::Replied,
            ..MessageFlags::default()
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IMAP message flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags {
    pub seen: bool,
    pub answered: bool,
    pub flagged: bool,
    pub deleted: bool,
    pub draft: bool,
    pub recent: bool,
}

impl MessageFlags {
    /// Convert flags to IMAP flag string (e.g., "(\Seen \Answered)")
    pub fn to_imap_string(&self) -> String {
        let mut flags = Vec::new();
        if self.seen {
            flags.push("\\Seen");
        }
        if self.answered {
            flags.push("\\Answered");
        }
        if self.flagged {
            flags.push("\\Flagged");
        }
        if self.deleted {
            flags.push("\\Deleted");
        }
        if self.draft {
            flags.push("\\Draft");
        }
        if self.recent {
            flags.push("\\Recent");
        }
        format!("({})", flags.join(" "))
    }

    /// Parse IMAP flags from a string like "(\Seen \Flagged)".
    /// Keywords and unknown flags are ignored; \Recent cannot be set by clients.
    pub fn from_imap_string(s: &str) -> Self {
        let mut flags = Self::default();
        for token in s
            .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
            .filter(|t| !t.is_empty())
        {
            match token.to_ascii_uppercase().as_str() {
                "\\SEEN" => flags.seen = true,
                "\\ANSWERED" => flags.answered = true,
                "\\FLAGGED" => flags.flagged = true,
                "\\DELETED" => flags.deleted = true,
                "\\DRAFT" => flags.draft = true,
                _ => {}
            }
        }
        flags
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Set every flag present in `other`
    pub fn insert(&mut self, other: MessageFlags) {
        self.seen |= other.seen;
        self.answered |= other.answered;
        self.flagged |= other.flagged;
        self.deleted |= other.deleted;
        self.draft |= other.draft;
    }

    /// Clear every flag present in `other`
    pub fn remove(&mut self, other: MessageFlags) {
        self.seen &= !other.seen;
        self.answered &= !other.answered;
        self.flagged &= !other.flagged;
        self.deleted &= !other.deleted;
        self.draft &= !other.draft;
    }

    /// Replace the client-settable flags, keeping \Recent
    pub fn replace(&mut self, other: MessageFlags) {
        let recent = self.recent;
        *self = other;
        self.recent = recent;
    }
}

/// Attachment descriptor as listed on a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}

/// A delivery message
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub sender_name: Option<String>,
    pub recipients: Vec<String>,
    pub content: String,
    pub content_html: Option<String>,
    pub attachments: Vec<AttachmentInfo>,
    pub received_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub folder: Folder,
    /// Derived from `status` on construction; mutated locally by STORE
    pub flags: MessageFlags,
}

impl Message {
    /// Message-ID header value synthesized for mail clients
    pub fn rfc_message_id(&self) -> String {
        format!("<{}@{}>", self.id, ADE_MAIL_DOMAIN)
    }
}

/// Static mapping between IMAP folder names and upstream folder identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Folder {
    Inbox,
    Sent,
    Drafts,
    Trash,
    Archive,
}

impl Folder {
    pub const ALL: [Folder; 5] = [
        Folder::Inbox,
        Folder::Sent,
        Folder::Drafts,
        Folder::Trash,
        Folder::Archive,
    ];

    pub fn imap_name(&self) -> &'static str {
        match self {
            Folder::Inbox => "INBOX",
            Folder::Sent => "Sent",
            Folder::Drafts => "Drafts",
            Folder::Trash => "Trash",
            Folder::Archive => "Archive",
        }
    }

    pub fn api_name(&self) -> &'static str {
        match self {
            Folder::Inbox => "inbox",
            Folder::Sent => "sent",
            Folder::Drafts => "drafts",
            Folder::Trash => "trash",
            Folder::Archive => "archive",
        }
    }

    /// LIST attributes
    pub fn attributes(&self) -> &'static str {
        match self {
            Folder::Inbox => "\\HasNoChildren",
            Folder::Sent => "\\HasNoChildren \\Sent",
            Folder::Drafts => "\\HasNoChildren \\Drafts",
            Folder::Trash => "\\HasNoChildren \\Trash",
            Folder::Archive => "\\HasNoChildren \\Archive",
        }
    }

    /// Resolve a client-supplied mailbox name (case-insensitive)
    pub fn from_imap_name(name: &str) -> Option<Self> {
        let name = name.trim_matches('"');
        Folder::ALL
            .into_iter()
            .find(|f| f.imap_name().eq_ignore_ascii_case(name))
    }

    pub fn from_api_name(name: &str) -> Option<Self> {
        Folder::ALL
            .into_iter()
            .find(|f| f.api_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.imap_name())
    }
}

fn ade_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^AE:PL-[A-Z0-9]{5}-[A-Z0-9]{5}-[A-Z0-9]{5}-[A-Z0-9]{2}$")
            .expect("static ADE pattern is valid")
    })
}

/// Whether `address` has the e-Doręczenia format AE:PL-XXXXX-XXXXX-XXXXX-XX
pub fn is_ade_address(address: &str) -> bool {
    ade_pattern().is_match(address)
}

/// Split an address into (mailbox, host) for IMAP envelopes.
/// Bare e-Doręczenia addresses get the gateway mail domain as host.
pub fn mail_parts(address: &str) -> (String, String) {
    match address.rsplit_once('@') {
        Some((local, domain)) => (local.to_string(), domain.to_string()),
        None => (address.to_string(), ADE_MAIL_DOMAIN.to_string()),
    }
}

/// Translate an SMTP recipient into a delivery address.
///
/// `<ADE>@edoreczenia.gov.pl` becomes the bare ADE address; anything else is
/// passed through unchanged.
pub fn translate_recipient(address: &str) -> String {
    if let Some((local, domain)) = address.rsplit_once('@') {
        if domain.eq_ignore_ascii_case(ADE_MAIL_DOMAIN) && is_ade_address(local) {
            return local.to_string();
        }
    }
    address.to_string()
}
