use super::command::SmtpCommand;
use super::mime::build_outgoing;
use super::response::SmtpResponse;
use super::transaction::MailTransaction;
use crate::api::DeliveryApi;
use crate::config::{AuthConfig, SmtpConfig};
use crate::model::is_ade_address;
use base64::Engine;
use log::{debug, info, warn};
use std::sync::Arc;

const USERNAME_CHALLENGE: &str = "VXNlcm5hbWU6"; // "Username:"
const PASSWORD_CHALLENGE: &str = "UGFzc3dvcmQ6"; // "Password:"

/// Longest command line accepted, CRLF included
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// State shared by every SMTP session of one listener
pub struct SmtpContext {
    pub api: Arc<dyn DeliveryApi>,
    pub auth: AuthConfig,
    /// Name announced in the greeting and EHLO reply
    pub hostname: String,
    pub max_message_size: usize,
}

impl SmtpContext {
    pub fn new(api: Arc<dyn DeliveryApi>, auth: AuthConfig, config: &SmtpConfig) -> Self {
        Self {
            api,
            auth,
            hostname: config.hostname.clone(),
            max_message_size: config.max_message_size,
        }
    }
}

/// SMTP session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// Waiting for HELO/EHLO
    Connected,
    /// Client has identified itself
    Greeted,
    /// MAIL FROM has been accepted
    MailFrom,
    /// At least one RCPT TO has been accepted
    RcptTo,
    /// Receiving DATA
    Data,
    /// Session is closing
    Closing,
}

/// AUTH exchange waiting for a client response
#[derive(Debug, Clone)]
enum AuthInProgress {
    Plain,
    LoginUsername,
    LoginPassword { username: String },
}

/// SMTP session for a single connection
pub struct SmtpSession {
    state: SmtpState,
    ctx: Arc<SmtpContext>,
    conn_id: u64,
    /// Client's identification (from HELO/EHLO)
    client_id: String,
    authenticated_user: Option<String>,
    auth_in_progress: Option<AuthInProgress>,
    transaction: MailTransaction,
    /// Bytes received but not yet consumed
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no line feed
    line_scan_from: usize,
    /// Rest of an oversized line is dropped up to its line feed
    discarding_line: bool,
    /// Where the search for the DATA terminator resumes
    data_scan_from: usize,
    /// DATA exceeded the size limit; the payload is being discarded
    data_overflow: bool,
}

impl SmtpSession {
    pub fn new(ctx: Arc<SmtpContext>, conn_id: u64) -> Self {
        Self {
            state: SmtpState::Connected,
            ctx,
            conn_id,
            client_id: String::new(),
            authenticated_user: None,
            auth_in_progress: None,
            transaction: MailTransaction::new(),
            buffer: Vec::new(),
            line_scan_from: 0,
            discarding_line: false,
            data_scan_from: 0,
            data_overflow: false,
        }
    }

    pub fn state(&self) -> SmtpState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated_user.is_some()
    }

    /// Get the initial greeting to send when connection is established
    pub fn greeting(&self) -> Vec<u8> {
        SmtpResponse::service_ready(&self.ctx.hostname).to_bytes()
    }

    /// Process incoming bytes; returns (response_data, should_close).
    ///
    /// Input may hold several pipelined commands or a DATA payload split
    /// across reads; whatever is incomplete stays buffered.
    pub async fn process_input(&mut self, input: &[u8]) -> (Vec<u8>, bool) {
        self.buffer.extend_from_slice(input);
        let mut responses = Vec::new();

        while self.state != SmtpState::Closing {
            if self.state == SmtpState::Data {
                if !self.collect_data() {
                    break;
                }
                responses.extend(self.finish_data().await);
                continue;
            }

            let Some(offset) = self.buffer[self.line_scan_from..]
                .iter()
                .position(|&b| b == b'\n')
            else {
                if self.buffer.len() > MAX_LINE_LENGTH {
                    if !self.discarding_line {
                        responses.extend(self.reject_line());
                    }
                    self.buffer.clear();
                    self.line_scan_from = 0;
                    self.discarding_line = true;
                } else {
                    self.line_scan_from = self.buffer.len();
                }
                break;
            };
            let line_end = self.line_scan_from + offset;
            self.line_scan_from = 0;
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            if std::mem::take(&mut self.discarding_line) {
                continue;
            }
            if raw.len() > MAX_LINE_LENGTH {
                responses.extend(self.reject_line());
                continue;
            }
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);

            let response = if self.auth_in_progress.is_some() {
                self.handle_auth_continuation(line)
            } else if line.is_empty() {
                continue;
            } else {
                self.process_command(line)
            };
            responses.extend(response);
        }

        (responses, self.state == SmtpState::Closing)
    }

    fn process_command(&mut self, line: &str) -> Vec<u8> {
        let command = SmtpCommand::parse(line);
        if !matches!(command, SmtpCommand::Auth { .. }) {
            debug!("[smtp {}] {}", self.conn_id, line);
        }

        match command {
            SmtpCommand::Helo(domain) => self.handle_helo(domain, false),
            SmtpCommand::Ehlo(domain) => self.handle_helo(domain, true),
            SmtpCommand::MailFrom { address, .. } => self.handle_mail_from(address),
            SmtpCommand::RcptTo { address, .. } => self.handle_rcpt_to(address),
            SmtpCommand::Data => self.handle_data(),
            SmtpCommand::Rset => {
                self.transaction.reset();
                if self.state != SmtpState::Connected {
                    self.state = SmtpState::Greeted;
                }
                SmtpResponse::ok("OK").to_bytes()
            }
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => self.handle_auth(&mechanism, initial_response.as_deref()),
            SmtpCommand::Vrfy(_) => SmtpResponse::cannot_verify().to_bytes(),
            SmtpCommand::Help => SmtpResponse::multiline(
                214,
                &[
                    "Commands supported:".to_string(),
                    "HELO EHLO AUTH MAIL RCPT DATA".to_string(),
                    "RSET NOOP QUIT HELP VRFY".to_string(),
                    "End of HELP info".to_string(),
                ],
            ),
            SmtpCommand::Noop => SmtpResponse::ok("OK").to_bytes(),
            SmtpCommand::Quit => {
                self.state = SmtpState::Closing;
                SmtpResponse::service_closing(&self.ctx.hostname).to_bytes()
            }
            // TLS is terminated in front of the gateway, if at all
            SmtpCommand::StartTls => SmtpResponse::not_implemented().to_bytes(),
            SmtpCommand::Invalid(_) => SmtpResponse::syntax_error_params().to_bytes(),
            SmtpCommand::Unknown(_) => SmtpResponse::syntax_error().to_bytes(),
        }
    }

    fn handle_helo(&mut self, domain: String, is_esmtp: bool) -> Vec<u8> {
        self.client_id = domain;
        self.state = SmtpState::Greeted;
        self.transaction.reset();

        if is_esmtp {
            self.build_ehlo_response()
        } else {
            SmtpResponse::ok(format!("{} Hello {}", self.ctx.hostname, self.client_id)).to_bytes()
        }
    }

    fn build_ehlo_response(&self) -> Vec<u8> {
        let lines = vec![
            format!("{} Hello {}", self.ctx.hostname, self.client_id),
            "8BITMIME".to_string(),
            "PIPELINING".to_string(),
            format!("SIZE {}", self.ctx.max_message_size),
            "AUTH PLAIN LOGIN".to_string(),
            "HELP".to_string(),
        ];
        SmtpResponse::multiline(250, &lines)
    }

    fn handle_mail_from(&mut self, address: String) -> Vec<u8> {
        if !self.is_authenticated() {
            return SmtpResponse::auth_required().to_bytes();
        }

        if self.transaction.has_mail_from() {
            return SmtpResponse::bad_sequence().to_bytes();
        }

        self.transaction.start(address.clone());
        self.state = SmtpState::MailFrom;
        SmtpResponse::ok(format!("OK <{}>", address)).to_bytes()
    }

    fn handle_rcpt_to(&mut self, address: String) -> Vec<u8> {
        if !self.is_authenticated() {
            return SmtpResponse::auth_required().to_bytes();
        }

        if self.state != SmtpState::MailFrom && self.state != SmtpState::RcptTo {
            return SmtpResponse::bad_sequence().to_bytes();
        }

        // Accepted either way; translation happens when the message is sent
        let local = address.rsplit_once('@').map_or(address.as_str(), |(l, _)| l);
        if !is_ade_address(&address) && !is_ade_address(local) {
            warn!(
                "[smtp {}] Recipient {} is not an e-Doreczenia address",
                self.conn_id, address
            );
        }

        self.transaction.add_rcpt_to(address.clone());
        self.state = SmtpState::RcptTo;
        SmtpResponse::ok(format!("OK <{}>", address)).to_bytes()
    }

    fn handle_data(&mut self) -> Vec<u8> {
        if !self.is_authenticated() {
            return SmtpResponse::auth_required().to_bytes();
        }

        if self.state != SmtpState::RcptTo || !self.transaction.has_recipients() {
            return SmtpResponse::bad_sequence().to_bytes();
        }

        self.state = SmtpState::Data;
        self.transaction.data.clear();
        self.data_scan_from = 0;
        self.data_overflow = false;
        SmtpResponse::start_mail_input().to_bytes()
    }

    fn reject_line(&mut self) -> Vec<u8> {
        warn!("[smtp {}] Command line too long, discarded", self.conn_id);
        self.auth_in_progress = None;
        SmtpResponse::line_too_long().to_bytes()
    }

    /// Move buffered input into the DATA payload; returns true once the
    /// terminating "." line has arrived
    fn collect_data(&mut self) -> bool {
        // The payload still begins at its first byte unless it overflowed
        let at_start = !self.data_overflow;
        let data = &mut self.transaction.data;
        data.append(&mut self.buffer);

        match find_data_end(data, self.data_scan_from, at_start) {
            Some((content_end, consumed)) => {
                // Anything after the terminator is the next pipelined command
                self.buffer = data.split_off(consumed);
                data.truncate(content_end);
                self.data_scan_from = 0;
                true
            }
            None => {
                if data.len() > self.ctx.max_message_size {
                    // Keep only what could be the start of a split terminator
                    self.data_overflow = true;
                    let keep = data.len().saturating_sub(4);
                    data.drain(..keep);
                }
                // A terminator split across reads starts in the last 4 bytes
                self.data_scan_from = data.len().saturating_sub(4);
                false
            }
        }
    }

    async fn finish_data(&mut self) -> Vec<u8> {
        let transaction = self.transaction.take();
        let data = transaction.data;
        self.state = SmtpState::Greeted;

        if std::mem::take(&mut self.data_overflow) || data.len() > self.ctx.max_message_size {
            warn!(
                "[smtp {}] Message rejected: exceeds {} bytes",
                self.conn_id, self.ctx.max_message_size
            );
            return SmtpResponse::storage_exceeded().to_bytes();
        }

        let raw = unstuff_dots(&data);
        let outgoing = match build_outgoing(&raw, &transaction.rcpt_to) {
            Ok(outgoing) => outgoing,
            Err(e) => {
                warn!("[smtp {}] Message rejected: {}", self.conn_id, e);
                return SmtpResponse::transaction_failed(e).to_bytes();
            }
        };

        info!(
            "[smtp {}] Sending \"{}\" to {:?} ({} attachments)",
            self.conn_id,
            outgoing.subject,
            outgoing
                .recipients
                .iter()
                .map(|r| r.address.as_str())
                .collect::<Vec<_>>(),
            outgoing.attachments.len()
        );

        match self.ctx.api.send_message(outgoing).await {
            Ok(receipt) => {
                let message_id = if receipt.message_id.is_empty() {
                    "unknown"
                } else {
                    receipt.message_id.as_str()
                };
                info!("[smtp {}] Message queued as {}", self.conn_id, message_id);
                SmtpResponse::queued(message_id).to_bytes()
            }
            Err(e) => {
                warn!("[smtp {}] Send failed: {}", self.conn_id, e);
                SmtpResponse::temporary_failure(e).to_bytes()
            }
        }
    }

    fn handle_auth(&mut self, mechanism: &str, initial_response: Option<&str>) -> Vec<u8> {
        if self.state == SmtpState::Connected {
            return SmtpResponse::bad_sequence().to_bytes();
        }

        if self.is_authenticated() {
            return SmtpResponse::new(503, "5.5.1 Already authenticated").to_bytes();
        }

        if self.transaction.has_mail_from() {
            return SmtpResponse::bad_sequence().to_bytes();
        }

        match (mechanism, initial_response) {
            ("PLAIN", None | Some("=")) => {
                self.auth_in_progress = Some(AuthInProgress::Plain);
                SmtpResponse::auth_continue("").to_bytes()
            }
            ("PLAIN", Some(response)) => self.complete_auth_plain(response),
            ("LOGIN", None | Some("=")) => {
                self.auth_in_progress = Some(AuthInProgress::LoginUsername);
                SmtpResponse::auth_continue(USERNAME_CHALLENGE).to_bytes()
            }
            ("LOGIN", Some(response)) => match decode_base64_text(response) {
                Some(username) => {
                    self.auth_in_progress = Some(AuthInProgress::LoginPassword { username });
                    SmtpResponse::auth_continue(PASSWORD_CHALLENGE).to_bytes()
                }
                None => SmtpResponse::syntax_error_params().to_bytes(),
            },
            _ => SmtpResponse::unrecognized_mechanism().to_bytes(),
        }
    }

    /// Handle AUTH continuation (client response to a 334 challenge)
    fn handle_auth_continuation(&mut self, response: &str) -> Vec<u8> {
        let Some(auth_state) = self.auth_in_progress.take() else {
            return SmtpResponse::bad_sequence().to_bytes();
        };

        if response.trim() == "*" {
            return SmtpResponse::auth_cancelled().to_bytes();
        }

        match auth_state {
            AuthInProgress::Plain => self.complete_auth_plain(response),
            AuthInProgress::LoginUsername => match decode_base64_text(response) {
                Some(username) => {
                    self.auth_in_progress = Some(AuthInProgress::LoginPassword { username });
                    SmtpResponse::auth_continue(PASSWORD_CHALLENGE).to_bytes()
                }
                None => SmtpResponse::syntax_error_params().to_bytes(),
            },
            AuthInProgress::LoginPassword { username } => match decode_base64_text(response) {
                Some(password) => self.verify_credentials(&username, &password),
                None => SmtpResponse::syntax_error_params().to_bytes(),
            },
        }
    }

    /// AUTH PLAIN payload: base64([authzid] NUL authcid NUL password)
    fn complete_auth_plain(&mut self, response: &str) -> Vec<u8> {
        let decoded = match base64::engine::general_purpose::STANDARD.decode(response.trim()) {
            Ok(d) => d,
            Err(_) => return SmtpResponse::syntax_error_params().to_bytes(),
        };

        let parts: Vec<&[u8]> = decoded.split(|&b| b == 0).collect();
        let (username, password) = match parts.as_slice() {
            [_authzid, authcid, password] => (authcid, password),
            [authcid, password] => (authcid, password),
            _ => return SmtpResponse::auth_failed().to_bytes(),
        };

        let username = String::from_utf8_lossy(username).to_string();
        let password = String::from_utf8_lossy(password).to_string();
        self.verify_credentials(&username, &password)
    }

    fn verify_credentials(&mut self, username: &str, password: &str) -> Vec<u8> {
        if self.ctx.auth.verify(username, password) {
            info!("[smtp {}] User {} authenticated", self.conn_id, username);
            self.authenticated_user = Some(username.to_string());
            SmtpResponse::auth_successful().to_bytes()
        } else {
            warn!("[smtp {}] Failed authentication for {}", self.conn_id, username);
            SmtpResponse::auth_failed().to_bytes()
        }
    }
}

fn decode_base64_text(data: &str) -> Option<String> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .ok()
        .map(|d| String::from_utf8_lossy(&d).to_string())
}

/// Locate the end-of-data marker. Returns (payload length, bytes consumed
/// including the terminator).
///
/// `at_start` allows the bare ".\r\n" of an empty payload.
fn find_data_end(buffer: &[u8], from: usize, at_start: bool) -> Option<(usize, usize)> {
    if at_start && buffer.starts_with(b".\r\n") {
        return Some((0, 3));
    }

    let marker = b"\r\n.\r\n";
    let from = from.min(buffer.len());
    buffer[from..]
        .windows(marker.len())
        .position(|w| w == marker)
        .map(|i| (from + i, from + i + marker.len()))
}

/// Remove dot-stuffing from message data (RFC 5321 Section 4.5.2)
fn unstuff_dots(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut at_line_start = true;
    let mut i = 0;

    while i < data.len() {
        if at_line_start && data[i] == b'.' && data.get(i + 1) == Some(&b'.') {
            i += 1;
        }
        let byte = data[i];
        result.push(byte);
        at_line_start = byte == b'\n';
        i += 1;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MockDeliveryApi, OutgoingMessage, SendReceipt};
    use crate::error::ApiError;

    const AUTH_PLAIN: &str = "AGVkb3JlY3plbmlhAHNlY3JldA=="; // \0edoreczenia\0secret
    const RCPT: &str = "AE:PL-11111-22222-33333-44@edoreczenia.gov.pl";

    fn session_with(api: MockDeliveryApi, max_message_size: usize) -> SmtpSession {
        let config = SmtpConfig {
            hostname: "gw.test".to_string(),
            max_message_size,
            ..SmtpConfig::default()
        };
        let ctx = SmtpContext::new(
            Arc::new(api),
            AuthConfig::new("edoreczenia", "secret"),
            &config,
        );
        SmtpSession::new(Arc::new(ctx), 1)
    }

    fn session(api: MockDeliveryApi) -> SmtpSession {
        session_with(api, 1024 * 1024)
    }

    async fn send(session: &mut SmtpSession, data: &str) -> String {
        let (out, _) = session.process_input(data.as_bytes()).await;
        String::from_utf8(out).unwrap()
    }

    async fn authenticated(api: MockDeliveryApi) -> SmtpSession {
        let mut s = session(api);
        send(&mut s, "EHLO client.test\r\n").await;
        let resp = send(&mut s, &format!("AUTH PLAIN {}\r\n", AUTH_PLAIN)).await;
        assert!(resp.starts_with("235"), "{}", resp);
        s
    }

    async fn open_transaction(s: &mut SmtpSession) {
        assert!(send(s, "MAIL FROM:<me@example.com>\r\n").await.starts_with("250"));
        assert!(send(s, &format!("RCPT TO:<{}>\r\n", RCPT)).await.starts_with("250"));
        assert!(send(s, "DATA\r\n").await.starts_with("354"));
    }

    fn receipt(id: &str) -> Result<SendReceipt, ApiError> {
        Ok(SendReceipt {
            message_id: id.to_string(),
            status: "SENT".to_string(),
        })
    }

    #[test]
    fn test_greeting() {
        let s = session(MockDeliveryApi::new());
        assert_eq!(s.greeting(), b"220 gw.test ESMTP e-Doreczenia gateway ready\r\n");
    }

    #[tokio::test]
    async fn test_ehlo_advertises_auth() {
        let mut s = session(MockDeliveryApi::new());
        let resp = send(&mut s, "EHLO client.test\r\n").await;
        assert!(resp.starts_with("250-gw.test Hello client.test\r\n"));
        assert!(resp.contains("250-AUTH PLAIN LOGIN\r\n"));
        assert!(resp.contains("250-SIZE 1048576\r\n"));
        assert!(resp.ends_with("250 HELP\r\n"));
        assert_eq!(s.state(), SmtpState::Greeted);
    }

    #[tokio::test]
    async fn test_transaction_requires_auth() {
        let mut api = MockDeliveryApi::new();
        api.expect_send_message().times(0);
        let mut s = session(api);
        send(&mut s, "EHLO client.test\r\n").await;

        assert!(send(&mut s, "MAIL FROM:<me@example.com>\r\n").await.starts_with("530"));
        assert!(send(&mut s, &format!("RCPT TO:<{}>\r\n", RCPT)).await.starts_with("530"));
        assert!(send(&mut s, "DATA\r\n").await.starts_with("530"));
        assert_eq!(s.state(), SmtpState::Greeted);
    }

    #[tokio::test]
    async fn test_auth_plain_and_login() {
        // PLAIN with continuation
        let mut s = session(MockDeliveryApi::new());
        send(&mut s, "EHLO client.test\r\n").await;
        assert_eq!(send(&mut s, "AUTH PLAIN\r\n").await, "334 \r\n");
        assert!(send(&mut s, &format!("{}\r\n", AUTH_PLAIN)).await.starts_with("235"));
        assert!(s.is_authenticated());
        assert!(send(&mut s, "AUTH LOGIN\r\n").await.starts_with("503"));

        // LOGIN challenge/response
        let mut s = session(MockDeliveryApi::new());
        send(&mut s, "EHLO client.test\r\n").await;
        assert_eq!(send(&mut s, "AUTH LOGIN\r\n").await, "334 VXNlcm5hbWU6\r\n");
        assert_eq!(send(&mut s, "ZWRvcmVjemVuaWE=\r\n").await, "334 UGFzc3dvcmQ6\r\n");
        assert!(send(&mut s, "c2VjcmV0\r\n").await.starts_with("235"));

        // LOGIN with initial response
        let mut s = session(MockDeliveryApi::new());
        send(&mut s, "EHLO client.test\r\n").await;
        assert_eq!(send(&mut s, "AUTH LOGIN ZWRvcmVjemVuaWE=\r\n").await, "334 UGFzc3dvcmQ6\r\n");
        assert!(send(&mut s, "c2VjcmV0\r\n").await.starts_with("235"));
    }

    #[tokio::test]
    async fn test_auth_failures() {
        let mut s = session(MockDeliveryApi::new());
        assert!(send(&mut s, &format!("AUTH PLAIN {}\r\n", AUTH_PLAIN)).await.starts_with("503"));

        send(&mut s, "EHLO client.test\r\n").await;
        let resp = send(&mut s, "AUTH PLAIN AGVkb3JlY3plbmlhAHdyb25n\r\n").await;
        assert!(resp.starts_with("535"));
        assert!(!s.is_authenticated());

        assert!(send(&mut s, "AUTH CRAM-MD5\r\n").await.starts_with("504"));

        send(&mut s, "AUTH LOGIN\r\n").await;
        assert!(send(&mut s, "*\r\n").await.starts_with("501"));
        assert!(!s.is_authenticated());
        // Back to command mode after the cancel
        assert!(send(&mut s, "NOOP\r\n").await.starts_with("250"));
    }

    #[tokio::test]
    async fn test_plain_message_sent_once() {
        let mut api = MockDeliveryApi::new();
        api.expect_send_message()
            .withf(|msg: &OutgoingMessage| {
                msg.subject == "Wniosek"
                    && msg.content.starts_with("Tresc wniosku.")
                    && msg.attachments.is_empty()
                    && msg.recipients.len() == 1
                    && msg.recipients[0].address == "AE:PL-11111-22222-33333-44"
            })
            .times(1)
            .returning(|_| receipt("msg-77"));
        let mut s = authenticated(api).await;
        open_transaction(&mut s).await;

        let resp = send(&mut s, "Subject: Wniosek\r\n\r\nTresc wniosku.\r\n.\r\n").await;
        assert_eq!(resp, "250 OK: Message queued as msg-77\r\n");
        assert_eq!(s.state(), SmtpState::Greeted);
    }

    #[tokio::test]
    async fn test_two_attachments_sent() {
        let mut api = MockDeliveryApi::new();
        api.expect_send_message()
            .withf(|msg: &OutgoingMessage| {
                msg.attachments.len() == 2
                    && msg.attachments[0].filename == "a.pdf"
                    && msg.attachments[0].content == "JVBERg=="
                    && msg.attachments[1].filename == "b.txt"
            })
            .times(1)
            .returning(|_| receipt("msg-78"));
        let mut s = authenticated(api).await;
        open_transaction(&mut s).await;

        let payload = concat!(
            "Subject: Dwa pliki\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=\"sep\"\r\n",
            "\r\n",
            "--sep\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Pliki w zalaczeniu.\r\n",
            "--sep\r\n",
            "Content-Type: application/pdf\r\n",
            "Content-Disposition: attachment; filename=\"a.pdf\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "JVBERg==\r\n",
            "--sep\r\n",
            "Content-Type: text/plain\r\n",
            "Content-Disposition: attachment; filename=\"b.txt\"\r\n",
            "\r\n",
            "notatka\r\n",
            "--sep--\r\n",
            ".\r\n"
        );
        let resp = send(&mut s, payload).await;
        assert_eq!(resp, "250 OK: Message queued as msg-78\r\n");
    }

    #[tokio::test]
    async fn test_api_error_is_transient() {
        let mut api = MockDeliveryApi::new();
        let mut calls = 0;
        api.expect_send_message().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(ApiError::Timeout(30))
            } else {
                receipt("msg-2")
            }
        });
        let mut s = authenticated(api).await;

        open_transaction(&mut s).await;
        let resp = send(&mut s, "Subject: A\r\n\r\nx\r\n.\r\n").await;
        assert!(resp.starts_with("451 "), "{}", resp);
        assert_eq!(s.state(), SmtpState::Greeted);

        // The failed envelope is gone; a fresh transaction succeeds
        open_transaction(&mut s).await;
        let resp = send(&mut s, "Subject: A\r\n\r\nx\r\n.\r\n").await;
        assert_eq!(resp, "250 OK: Message queued as msg-2\r\n");
    }

    #[tokio::test]
    async fn test_empty_payload_is_permanent_failure() {
        let mut api = MockDeliveryApi::new();
        api.expect_send_message().times(0);
        let mut s = authenticated(api).await;
        open_transaction(&mut s).await;

        let resp = send(&mut s, ".\r\n").await;
        assert!(resp.starts_with("554 "), "{}", resp);
    }

    #[tokio::test]
    async fn test_oversized_message() {
        let mut api = MockDeliveryApi::new();
        api.expect_send_message().times(0);
        let mut s = session_with(api, 64);
        send(&mut s, "EHLO client.test\r\n").await;
        send(&mut s, &format!("AUTH PLAIN {}\r\n", AUTH_PLAIN)).await;
        open_transaction(&mut s).await;

        let body = "x".repeat(100);
        assert_eq!(send(&mut s, &format!("Subject: big\r\n\r\n{}", body)).await, "");
        assert_eq!(send(&mut s, &format!("{}\r\n", body)).await, "");
        let resp = send(&mut s, ".\r\nNOOP\r\n").await;
        assert_eq!(resp, "552 5.3.4 Message size exceeds fixed maximum message size\r\n250 OK\r\n");
    }

    #[tokio::test]
    async fn test_data_split_and_dot_stuffed() {
        let mut api = MockDeliveryApi::new();
        api.expect_send_message()
            .withf(|msg: &OutgoingMessage| {
                msg.content.contains(".hidden") && !msg.content.contains("..hidden")
            })
            .times(1)
            .returning(|_| receipt("msg-9"));
        let mut s = authenticated(api).await;
        open_transaction(&mut s).await;

        assert_eq!(send(&mut s, "Subject: Split\r\n\r\nline one\r\n..hid").await, "");
        assert_eq!(send(&mut s, "den\r\n.").await, "");
        let resp = send(&mut s, "\r\nQUIT\r\n").await;
        assert!(resp.starts_with("250 OK: Message queued as msg-9\r\n221 "));
        assert_eq!(s.state(), SmtpState::Closing);
    }

    #[tokio::test]
    async fn test_large_payload_in_small_reads() {
        let mut api = MockDeliveryApi::new();
        api.expect_send_message()
            .withf(|msg: &OutgoingMessage| {
                msg.subject == "Duzy" && msg.content.matches('y').count() == 200 * 1024
            })
            .times(1)
            .returning(|_| receipt("msg-big"));
        let mut s = authenticated(api).await;
        open_transaction(&mut s).await;

        // One body line far longer than any command line may be
        let payload = format!("Subject: Duzy\r\n\r\n{}\r\n.\r\n", "y".repeat(200 * 1024));
        let mut out = Vec::new();
        for chunk in payload.as_bytes().chunks(8192) {
            let (resp, close) = s.process_input(chunk).await;
            assert!(!close);
            out.extend(resp);
        }
        assert_eq!(out, b"250 OK: Message queued as msg-big\r\n");
    }

    #[tokio::test]
    async fn test_overlong_line_without_newline() {
        let mut s = session(MockDeliveryApi::new());
        let chunk = vec![b'A'; 8192];
        let mut out = Vec::new();
        for _ in 0..(MAX_LINE_LENGTH / 8192 + 2) {
            let (resp, close) = s.process_input(&chunk).await;
            assert!(!close);
            out.extend(resp);
        }
        assert_eq!(out, b"500 5.5.2 Line too long\r\n");
        assert!(s.buffer.len() <= MAX_LINE_LENGTH);

        // Further bytes of the same line are dropped silently
        let (resp, _) = s.process_input(&chunk).await;
        assert!(resp.is_empty());
        assert_eq!(send(&mut s, "AAAA\r\nNOOP\r\n").await, "250 OK\r\n");
    }

    #[tokio::test]
    async fn test_overlong_line_in_one_read() {
        let mut s = session(MockDeliveryApi::new());
        let line = format!("NOOP {}\r\nNOOP\r\n", "x".repeat(MAX_LINE_LENGTH));
        assert_eq!(
            send(&mut s, &line).await,
            "500 5.5.2 Line too long\r\n250 OK\r\n"
        );
    }

    #[tokio::test]
    async fn test_non_ade_recipient_accepted() {
        let mut api = MockDeliveryApi::new();
        api.expect_send_message()
            .withf(|msg: &OutgoingMessage| msg.recipients[0].address == "someone@example.com")
            .times(1)
            .returning(|_| receipt("msg-5"));
        let mut s = authenticated(api).await;

        send(&mut s, "MAIL FROM:<me@example.com>\r\n").await;
        let resp = send(&mut s, "RCPT TO:<someone@example.com>\r\n").await;
        assert_eq!(resp, "250 OK <someone@example.com>\r\n");
        send(&mut s, "DATA\r\n").await;
        let resp = send(&mut s, "Subject: x\r\n\r\ny\r\n.\r\n").await;
        assert!(resp.starts_with("250 OK: Message queued as msg-5"));
    }

    #[tokio::test]
    async fn test_sequence_errors() {
        let mut s = authenticated(MockDeliveryApi::new()).await;
        assert!(send(&mut s, &format!("RCPT TO:<{}>\r\n", RCPT)).await.starts_with("503"));
        assert!(send(&mut s, "DATA\r\n").await.starts_with("503"));
        send(&mut s, "MAIL FROM:<me@example.com>\r\n").await;
        assert!(send(&mut s, "MAIL FROM:<me@example.com>\r\n").await.starts_with("503"));
        assert!(send(&mut s, "DATA\r\n").await.starts_with("503"));
        assert_eq!(send(&mut s, "RSET\r\n").await, "250 OK\r\n");
        assert_eq!(s.state(), SmtpState::Greeted);
    }

    #[tokio::test]
    async fn test_misc_commands() {
        let mut s = session(MockDeliveryApi::new());
        let resp = send(&mut s, "HELO box\r\nVRFY someone\r\nSTARTTLS\r\nFOO\r\nMAIL TO:<x>\r\nHELP\r\n").await;
        let lines: Vec<&str> = resp.lines().collect();
        assert_eq!(lines[0], "250 gw.test Hello box");
        assert!(lines[1].starts_with("252 "));
        assert!(lines[2].starts_with("502 "));
        assert!(lines[3].starts_with("500 "));
        assert!(lines[4].starts_with("501 "));
        assert!(lines[5].starts_with("214-"));
        assert!(lines.last().unwrap().starts_with("214 "));

        let (out, close) = s.process_input(b"QUIT\r\n").await;
        assert!(close);
        assert!(out.starts_with(b"221 "));
    }

    #[test]
    fn test_find_data_end() {
        assert_eq!(find_data_end(b".\r\n", 0, true), Some((0, 3)));
        assert_eq!(find_data_end(b".\r\n", 0, false), None);
        assert_eq!(find_data_end(b"abc\r\n.\r\nNOOP", 0, true), Some((3, 8)));
        assert_eq!(find_data_end(b"abc\r\n..\r\n", 0, true), None);
        // Resuming past the start still reports absolute offsets
        assert_eq!(find_data_end(b"abc\r\n.\r\nNOOP", 2, true), Some((3, 8)));
        assert_eq!(find_data_end(b"ab", 10, false), None);
    }

    #[test]
    fn test_unstuff_dots() {
        assert_eq!(unstuff_dots(b"..start\r\n..x\r\na..b"), b".start\r\n.x\r\na..b".to_vec());
    }
}
