/// IMAP response formatting and message synthesis
use super::mailbox::MailboxSnapshot;
use crate::api::AttachmentData;
use crate::model::{mail_parts, Folder, Message};
use base64::Engine;
use chrono::{DateTime, Utc};

/// Capabilities advertised in the greeting and CAPABILITY
pub const CAPABILITIES: &str = "IMAP4rev1 AUTH=PLAIN SASL-IR";

/// Format a tagged OK response
pub fn ok(tag: &str, message: &str) -> String {
    format!("{} OK {}\r\n", tag, message)
}

/// Format a tagged NO response
pub fn no(tag: &str, message: &str) -> String {
    format!("{} NO {}\r\n", tag, message)
}

/// Format a tagged BAD response
pub fn bad(tag: &str, message: &str) -> String {
    format!("{} BAD {}\r\n", tag, message)
}

/// Format an untagged response
pub fn untagged(response: &str) -> String {
    format!("* {}\r\n", response)
}

/// Format a BYE response
pub fn bye(message: &str) -> String {
    format!("* BYE {}\r\n", message)
}

/// Format a continuation request
pub fn continuation(message: &str) -> String {
    if message.is_empty() {
        "+ \r\n".to_string()
    } else {
        format!("+ {}\r\n", message)
    }
}

/// Format a capability response
pub fn capability() -> String {
    untagged(&format!("CAPABILITY {}", CAPABILITIES))
}

/// LIST/LSUB lines for the folders matching `pattern`
pub fn list_folders(command: &str, reference: &str, pattern: &str) -> String {
    if pattern.is_empty() {
        // Hierarchy delimiter query
        return untagged(&format!(r#"{} (\Noselect) "/" """#, command));
    }

    let full_pattern = format!("{}{}", reference, pattern);
    Folder::ALL
        .iter()
        .filter(|f| pattern_matches(&full_pattern, f.imap_name()))
        .map(|f| {
            untagged(&format!(
                r#"{} ({}) "/" {}"#,
                command,
                f.attributes(),
                quoted_string(f.imap_name())
            ))
        })
        .collect()
}

/// LIST wildcard matching (`*` and `%`; the namespace is flat so both behave alike)
fn pattern_matches(pattern: &str, name: &str) -> bool {
    fn matches(p: &[char], n: &[char]) -> bool {
        match p.split_first() {
            None => n.is_empty(),
            Some(('*' | '%', rest)) => (0..=n.len()).any(|i| matches(rest, &n[i..])),
            Some((c, rest)) => n
                .split_first()
                .is_some_and(|(h, tail)| h.eq_ignore_ascii_case(c) && matches(rest, tail)),
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    matches(&p, &n)
}

/// Format mailbox status for SELECT/EXAMINE
pub fn mailbox_status(snapshot: &MailboxSnapshot) -> String {
    let mut response = String::new();

    response.push_str(&untagged(&format!("{} EXISTS", snapshot.exists())));
    response.push_str(&untagged(&format!("{} RECENT", snapshot.recent())));
    response.push_str(&untagged("FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)"));
    if snapshot.read_only {
        response.push_str(&untagged("OK [PERMANENTFLAGS ()] Read-only mailbox"));
    } else {
        response.push_str(&untagged(
            "OK [PERMANENTFLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)] Limited",
        ));
    }

    if let Some(first_unseen) = snapshot.first_unseen() {
        response.push_str(&untagged(&format!(
            "OK [UNSEEN {}] First unseen message",
            first_unseen
        )));
    }

    response.push_str(&untagged(&format!(
        "OK [UIDVALIDITY {}] UIDs valid",
        snapshot.uid_validity
    )));
    response.push_str(&untagged(&format!(
        "OK [UIDNEXT {}] Predicted next UID",
        snapshot.uid_next
    )));

    response
}

/// Format a STATUS response
pub fn status(folder: Folder, items: &[String]) -> String {
    untagged(&format!(
        "STATUS {} ({})",
        quoted_string(folder.imap_name()),
        items.join(" ")
    ))
}

/// Format a FETCH response line
pub fn fetch_response(seq: u32, items: &[String]) -> String {
    untagged(&format!("{} FETCH ({})", seq, items.join(" ")))
}

/// Format an EXPUNGE response
pub fn expunge(seq: u32) -> String {
    untagged(&format!("{} EXPUNGE", seq))
}

/// Format a SEARCH response
pub fn search(ids: &[u32]) -> String {
    if ids.is_empty() {
        return untagged("SEARCH");
    }
    let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    untagged(&format!("SEARCH {}", ids.join(" ")))
}

/// Format a fetch item carrying a literal; the length counts bytes
pub fn literal(label: &str, data: &str) -> String {
    format!("{} {{{}}}\r\n{}", label, data.len(), data)
}

/// Quote a string for IMAP
pub fn quoted_string(s: &str) -> String {
    let escaped: String = s
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Format NIL for empty values
pub fn nil() -> &'static str {
    "NIL"
}

fn nstring(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => quoted_string(v),
        _ => nil().to_string(),
    }
}

/// RFC 2047 encoded-word for non-ASCII header text
pub fn encode_header_word(s: &str) -> String {
    if s.is_ascii() {
        return s.to_string();
    }
    format!(
        "=?UTF-8?B?{}?=",
        base64::engine::general_purpose::STANDARD.encode(s.as_bytes())
    )
}

/// Format internal date
pub fn format_internal_date(date: &DateTime<Utc>) -> String {
    date.format("\"%d-%b-%Y %H:%M:%S +0000\"").to_string()
}

/// Date header value
pub fn format_rfc2822_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S +0000").to_string()
}

fn format_address(name: Option<&str>, address: &str) -> String {
    let (mailbox, host) = mail_parts(address);
    format!(
        "({} NIL {} {})",
        nstring(name.map(encode_header_word).as_deref()),
        quoted_string(&mailbox),
        quoted_string(&host)
    )
}

fn format_address_list(addresses: &[String]) -> String {
    if addresses.is_empty() {
        return nil().to_string();
    }
    let list: Vec<String> = addresses
        .iter()
        .map(|a| format_address(None, a))
        .collect();
    format!("({})", list.join(""))
}

/// ENVELOPE for a delivery message; the sender doubles as Sender and Reply-To
pub fn envelope(msg: &Message) -> String {
    let from = format!(
        "({})",
        format_address(msg.sender_name.as_deref(), &msg.sender)
    );

    format!(
        "({} {} {} {} {} {} NIL NIL NIL {})",
        quoted_string(&format_rfc2822_date(&msg.received_at)),
        quoted_string(&encode_header_word(&msg.subject)),
        from,
        from,
        from,
        format_address_list(&msg.recipients),
        quoted_string(&msg.rfc_message_id()),
    )
}

/// Header address form: bare delivery addresses get the gateway mail domain
fn header_address(name: Option<&str>, address: &str) -> String {
    let (mailbox, host) = mail_parts(address);
    match name {
        Some(name) if !name.is_empty() => {
            format!("\"{}\" <{}@{}>", encode_header_word(name), mailbox, host)
        }
        _ => format!("<{}@{}>", mailbox, host),
    }
}

fn crlf(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

fn wrap_base64(data: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 76 * 2 + 2);
    for chunk in encoded.as_bytes().chunks(76) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
    out
}

fn split_content_type(content_type: &str) -> (String, String) {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    match essence.split_once('/') {
        Some((t, s)) if !t.is_empty() && !s.is_empty() => {
            (t.to_ascii_uppercase(), s.to_ascii_uppercase())
        }
        _ => ("APPLICATION".to_string(), "OCTET-STREAM".to_string()),
    }
}

/// A message rendered as RFC 822 text
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    /// Header block including the terminating empty line
    pub header: String,
    pub body: String,
    pub body_structure: String,
}

impl RenderedMessage {
    pub fn full(&self) -> String {
        format!("{}{}", self.header, self.body)
    }

    pub fn size(&self) -> usize {
        self.header.len() + self.body.len()
    }

    /// Header lines whose names are listed in `fields` (upper-case), plus the empty line
    pub fn header_fields(&self, fields: &[String]) -> String {
        let mut out: String = self
            .header
            .split("\r\n")
            .filter(|line| {
                line.split_once(':')
                    .is_some_and(|(name, _)| fields.contains(&name.trim().to_ascii_uppercase()))
            })
            .map(|line| format!("{}\r\n", line))
            .collect();
        out.push_str("\r\n");
        out
    }
}

/// Synthesize the message served for RFC822/BODY[].
///
/// Without attachment contents this is a single text part; with them it is
/// multipart/mixed with one base64 part per attachment.
pub fn render_message(msg: &Message, attachments: &[AttachmentData]) -> RenderedMessage {
    let (subtype, text) = if msg.content.is_empty() {
        match msg.content_html.as_deref() {
            Some(html) if !html.is_empty() => ("html", crlf(html)),
            _ => ("plain", String::new()),
        }
    } else {
        ("plain", crlf(&msg.content))
    };

    let recipients: Vec<String> = msg
        .recipients
        .iter()
        .map(|r| header_address(None, r))
        .collect();

    let mut header = String::new();
    header.push_str(&format!(
        "From: {}\r\n",
        header_address(msg.sender_name.as_deref(), &msg.sender)
    ));
    if !recipients.is_empty() {
        header.push_str(&format!("To: {}\r\n", recipients.join(", ")));
    }
    header.push_str(&format!("Subject: {}\r\n", encode_header_word(&msg.subject)));
    header.push_str(&format!("Date: {}\r\n", format_rfc2822_date(&msg.received_at)));
    header.push_str(&format!("Message-ID: {}\r\n", msg.rfc_message_id()));
    header.push_str("MIME-Version: 1.0\r\n");

    let text_lines = text.lines().count();
    let text_structure = format!(
        "(\"TEXT\" \"{}\" (\"CHARSET\" \"UTF-8\") NIL NIL \"8BIT\" {} {})",
        subtype.to_ascii_uppercase(),
        text.len(),
        text_lines
    );

    if attachments.is_empty() {
        header.push_str(&format!(
            "Content-Type: text/{}; charset=utf-8\r\n",
            subtype
        ));
        header.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");
        return RenderedMessage {
            header,
            body: text,
            body_structure: text_structure,
        };
    }

    let boundary = format!(
        "=_edoreczenia_{}",
        msg.id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
    );
    header.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
        boundary
    ));

    let mut body = String::new();
    body.push_str(&format!("--{}\r\n", boundary));
    body.push_str(&format!(
        "Content-Type: text/{}; charset=utf-8\r\nContent-Transfer-Encoding: 8bit\r\n\r\n",
        subtype
    ));
    body.push_str(&text);
    body.push_str("\r\n");

    let mut structures = vec![text_structure];
    for attachment in attachments {
        let filename = encode_header_word(&attachment.filename);
        let encoded = wrap_base64(&attachment.content);
        let (ctype, csub) = split_content_type(&attachment.content_type);

        body.push_str(&format!("--{}\r\n", boundary));
        body.push_str(&format!(
            "Content-Type: {}/{}; name=\"{}\"\r\n",
            ctype.to_ascii_lowercase(),
            csub.to_ascii_lowercase(),
            filename
        ));
        body.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{}\"\r\n",
            filename
        ));
        body.push_str("Content-Transfer-Encoding: base64\r\n\r\n");

        structures.push(format!(
            "(\"{}\" \"{}\" (\"NAME\" {}) NIL NIL \"BASE64\" {} NIL (\"ATTACHMENT\" (\"FILENAME\" {})) NIL)",
            ctype,
            csub,
            quoted_string(&filename),
            encoded.len(),
            quoted_string(&filename)
        ));
        body.push_str(&encoded);
    }
    body.push_str(&format!("--{}--\r\n", boundary));

    RenderedMessage {
        header,
        body,
        body_structure: format!(
            "({} \"MIXED\" (\"BOUNDARY\" {}) NIL NIL)",
            structures.join(""),
            quoted_string(&boundary)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageFlags, MessageStatus};
    use chrono::TimeZone;

    fn sample() -> Message {
        Message {
            id: "msg-1".to_string(),
            subject: "Wezwanie \"pilne\"".to_string(),
            sender: "AE:PL-11111-22222-33333-44".to_string(),
            sender_name: Some("Urząd Skarbowy".to_string()),
            recipients: vec![
                "AE:PL-55555-66666-77777-88".to_string(),
                "jan@example.com".to_string(),
            ],
            content: "Linia 1\nLinia 2".to_string(),
            content_html: None,
            attachments: Vec::new(),
            received_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
            status: MessageStatus::Received,
            folder: Folder::Inbox,
            flags: MessageFlags::default(),
        }
    }

    #[test]
    fn test_tagged_responses() {
        assert_eq!(ok("a1", "done"), "a1 OK done\r\n");
        assert_eq!(no("a1", "nope"), "a1 NO nope\r\n");
        assert_eq!(bad("a1", "what"), "a1 BAD what\r\n");
        assert_eq!(expunge(3), "* 3 EXPUNGE\r\n");
        assert_eq!(search(&[]), "* SEARCH\r\n");
        assert_eq!(search(&[1, 4]), "* SEARCH 1 4\r\n");
    }

    #[test]
    fn test_quoted_string() {
        assert_eq!(quoted_string("plain"), "\"plain\"");
        assert_eq!(quoted_string("a \"b\" \\c"), "\"a \\\"b\\\" \\\\c\"");
        assert_eq!(quoted_string("line\r\nbreak"), "\"linebreak\"");
    }

    #[test]
    fn test_list_patterns() {
        let all = list_folders("LIST", "", "*");
        assert_eq!(all.lines().count(), 5);
        assert!(all.contains(r#"* LIST (\HasNoChildren) "/" "INBOX""#));
        assert!(all.contains(r#"* LIST (\HasNoChildren \Sent) "/" "Sent""#));

        let inbox = list_folders("LSUB", "", "inbox");
        assert_eq!(inbox, "* LSUB (\\HasNoChildren) \"/\" \"INBOX\"\r\n");

        assert_eq!(list_folders("LIST", "", "Dr%").lines().count(), 1);
        assert!(list_folders("LIST", "", "").contains("\\Noselect"));
        assert!(list_folders("LIST", "", "Junk").is_empty());
    }

    #[test]
    fn test_envelope() {
        let env = envelope(&sample());
        assert!(env.starts_with("(\"Mon, 15 Jan 2024 10:30:00 +0000\" \"Wezwanie \\\"pilne\\\"\""));
        assert!(env.contains("(\"=?UTF-8?B?"));
        assert!(env.contains("\"AE:PL-11111-22222-33333-44\" \"edoreczenia.gov.pl\""));
        assert!(env.contains("((NIL NIL \"AE:PL-55555-66666-77777-88\" \"edoreczenia.gov.pl\")(NIL NIL \"jan\" \"example.com\"))"));
        assert!(env.ends_with("NIL NIL NIL \"<msg-1@edoreczenia.gov.pl>\")"));
    }

    #[test]
    fn test_render_single_part() {
        let rendered = render_message(&sample(), &[]);
        assert!(rendered.header.contains("From: \"=?UTF-8?B?"));
        assert!(rendered
            .header
            .contains("To: <AE:PL-55555-66666-77777-88@edoreczenia.gov.pl>, <jan@example.com>\r\n"));
        assert!(rendered.header.contains("Date: Mon, 15 Jan 2024 10:30:00 +0000\r\n"));
        assert!(rendered.header.contains("Message-ID: <msg-1@edoreczenia.gov.pl>\r\n"));
        assert!(rendered.header.ends_with("Content-Transfer-Encoding: 8bit\r\n\r\n"));
        assert_eq!(rendered.body, "Linia 1\r\nLinia 2");
        assert_eq!(rendered.size(), rendered.full().len());
        assert!(rendered.body_structure.starts_with("(\"TEXT\" \"PLAIN\""));
        // Last line has no CRLF but still counts
        assert!(rendered.body_structure.ends_with("\"8BIT\" 16 2)"));

        let mut msg = sample();
        msg.content = "Linia 1\nLinia 2\n".to_string();
        let rendered = render_message(&msg, &[]);
        assert!(rendered.body_structure.ends_with("\"8BIT\" 18 2)"));
    }

    #[test]
    fn test_render_html_fallback() {
        let mut msg = sample();
        msg.content.clear();
        msg.content_html = Some("<p>Hi</p>".to_string());
        let rendered = render_message(&msg, &[]);
        assert!(rendered.header.contains("Content-Type: text/html; charset=utf-8"));
        assert_eq!(rendered.body, "<p>Hi</p>");
    }

    #[test]
    fn test_render_with_attachments() {
        let attachment = AttachmentData {
            content: b"hello".to_vec(),
            filename: "a.txt".to_string(),
            content_type: "text/plain".to_string(),
        };
        let rendered = render_message(&sample(), &[attachment]);
        assert!(rendered
            .header
            .contains("Content-Type: multipart/mixed; boundary=\"=_edoreczenia_msg1\""));
        assert!(rendered.body.contains("Content-Disposition: attachment; filename=\"a.txt\""));
        assert!(rendered.body.contains("aGVsbG8=\r\n"));
        assert!(rendered.body.ends_with("--=_edoreczenia_msg1--\r\n"));
        assert!(rendered.body_structure.contains("\"MIXED\""));
    }

    #[test]
    fn test_header_fields() {
        let rendered = render_message(&sample(), &[]);
        let fields = rendered.header_fields(&["SUBJECT".to_string(), "DATE".to_string()]);
        assert!(fields.starts_with("Subject: "));
        assert!(fields.contains("Date: Mon, 15 Jan 2024"));
        assert!(!fields.contains("From:"));
        assert!(fields.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_internal_date() {
        let date = Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap();
        assert_eq!(format_internal_date(&date), "\"05-Jan-2024 08:00:00 +0000\"");
    }
}
