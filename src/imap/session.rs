/// IMAP session handler
use super::command::{
    quote_argument, trailing_literal, BodySection, CommandKind, FetchItems, ImapCommand,
    SearchKey, SequenceSet, StoreAction, StoreMode,
};
use super::mailbox::{MailboxSnapshot, SnapshotEntry, UidRegistry};
use super::response::{self, RenderedMessage};
use crate::api::{AttachmentData, DeliveryApi, MessageQuery};
use crate::config::{AuthConfig, ImapConfig};
use crate::error::ApiError;
use crate::model::{Folder, MessageFlags, MessageStatus};
use base64::Engine;
use log::{debug, info, warn};
use std::sync::Arc;

/// Longest command line accepted between line feeds
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// State shared by every IMAP session of one listener
pub struct ImapContext {
    pub api: Arc<dyn DeliveryApi>,
    pub auth: AuthConfig,
    pub registry: UidRegistry,
    /// Messages requested per SELECT
    pub page_size: u32,
    pub fetch_attachments: bool,
    pub expunge_upstream: bool,
    /// Largest command accepted, literals included
    pub max_command_size: usize,
}

impl ImapContext {
    pub fn new(
        api: Arc<dyn DeliveryApi>,
        auth: AuthConfig,
        config: &ImapConfig,
        page_size: u32,
        uid_validity: u32,
    ) -> Self {
        Self {
            api,
            auth,
            registry: UidRegistry::new(uid_validity),
            page_size,
            fetch_attachments: config.fetch_attachments,
            expunge_upstream: config.expunge_upstream,
            max_command_size: config.max_command_size,
        }
    }
}

/// IMAP session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapState {
    /// Not authenticated
    NotAuthenticated,
    /// Authenticated but no mailbox selected
    Authenticated,
    /// Mailbox selected
    Selected,
    /// Logout requested
    Logout,
}

/// IMAP session for one mail client connection
pub struct ImapSession {
    state: ImapState,
    ctx: Arc<ImapContext>,
    conn_id: u64,
    /// Snapshot taken by the last successful SELECT/EXAMINE
    mailbox: Option<MailboxSnapshot>,
    /// Bytes received but not yet consumed
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no line feed
    line_scan_from: usize,
    /// Rest of an oversized line is dropped up to its line feed
    discarding_line: bool,
    /// Command line being assembled around literals
    pending_line: String,
    /// Bytes still expected for the current literal
    literal_remaining: Option<usize>,
    /// Tag of an AUTHENTICATE waiting for the client response
    auth_in_progress: Option<String>,
}

impl ImapSession {
    pub fn new(ctx: Arc<ImapContext>, conn_id: u64) -> Self {
        Self {
            state: ImapState::NotAuthenticated,
            ctx,
            conn_id,
            mailbox: None,
            buffer: Vec::new(),
            line_scan_from: 0,
            discarding_line: false,
            pending_line: String::new(),
            literal_remaining: None,
            auth_in_progress: None,
        }
    }

    pub fn state(&self) -> ImapState {
        self.state
    }

    pub fn selected_folder(&self) -> Option<Folder> {
        self.mailbox.as_ref().map(|m| m.folder)
    }

    /// Generate the initial greeting
    pub fn greeting(&self) -> Vec<u8> {
        format!(
            "* OK [CAPABILITY {}] e-Doreczenia IMAP gateway ready\r\n",
            response::CAPABILITIES
        )
        .into_bytes()
    }

    /// Process incoming IMAP data.
    ///
    /// Commands are handled strictly in order; each one's upstream calls finish
    /// before the next line is looked at. Returns (response_data, should_close).
    pub async fn process_input(&mut self, data: &[u8]) -> (Vec<u8>, bool) {
        self.buffer.extend_from_slice(data);
        let mut responses = String::new();

        while self.state != ImapState::Logout {
            if let Some(needed) = self.literal_remaining {
                if self.buffer.len() < needed {
                    break;
                }
                let bytes: Vec<u8> = self.buffer.drain(..needed).collect();
                self.pending_line
                    .push_str(&quote_argument(&String::from_utf8_lossy(&bytes)));
                self.literal_remaining = None;
                continue;
            }

            let Some(offset) = self.buffer[self.line_scan_from..]
                .iter()
                .position(|&b| b == b'\n')
            else {
                if self.line_too_long(self.buffer.len()) {
                    if !self.discarding_line {
                        let tag = self.line_tag(&self.buffer);
                        responses.push_str(&self.reject_line(&tag));
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
            if self.line_too_long(raw.len()) {
                let tag = self.line_tag(&raw);
                responses.push_str(&self.reject_line(&tag));
                continue;
            }

            let text = String::from_utf8_lossy(&raw);
            self.pending_line
                .push_str(text.trim_end_matches(['\r', '\n']));

            if let Some((open, size)) = trailing_literal(&self.pending_line) {
                let synchronizing = !self.pending_line.ends_with("+}");
                if self.pending_line.len().saturating_add(size) > self.ctx.max_command_size {
                    warn!(
                        "[imap {}] Rejected {} byte literal (limit {})",
                        self.conn_id, size, self.ctx.max_command_size
                    );
                    let tag = self.line_tag(&[]);
                    self.pending_line.clear();
                    if synchronizing {
                        responses.push_str(&response::bad(&tag, "Literal too large"));
                    } else {
                        // The client sends the data regardless; no way to resync
                        responses.push_str(&response::bye("Literal too large"));
                        self.state = ImapState::Logout;
                    }
                    continue;
                }
                self.pending_line.truncate(open);
                self.literal_remaining = Some(size);
                if synchronizing {
                    responses.push_str(&response::continuation("Ready for literal data"));
                }
                continue;
            }

            let line = std::mem::take(&mut self.pending_line);
            responses.push_str(&self.handle_line(&line).await);
        }

        (responses.into_bytes(), self.state == ImapState::Logout)
    }

    /// A raw line of `len` bytes, added to what is pending, exceeds the limits
    fn line_too_long(&self, len: usize) -> bool {
        len > MAX_LINE_LENGTH || self.pending_line.len() + len > self.ctx.max_command_size
    }

    /// Tag of the command being assembled, or "*" when none can be told
    fn line_tag(&self, raw: &[u8]) -> String {
        let head = if self.pending_line.is_empty() {
            String::from_utf8_lossy(&raw[..raw.len().min(64)]).into_owned()
        } else {
            self.pending_line.chars().take(64).collect()
        };
        match head.split_whitespace().next() {
            Some(tag) if head.contains(' ') && tag.chars().all(is_tag_char) => tag.to_string(),
            _ => "*".to_string(),
        }
    }

    fn reject_line(&mut self, tag: &str) -> String {
        warn!("[imap {}] Command line too long, discarded", self.conn_id);
        self.pending_line.clear();
        if let Some(auth_tag) = self.auth_in_progress.take() {
            return response::bad(&auth_tag, "Line too long");
        }
        if tag == "*" {
            response::untagged("BAD Line too long")
        } else {
            response::bad(tag, "Line too long")
        }
    }

    async fn handle_line(&mut self, line: &str) -> String {
        // Check if we're in the middle of AUTHENTICATE
        if let Some(tag) = self.auth_in_progress.take() {
            return self.handle_auth_response(&tag, line);
        }

        match ImapCommand::parse(line) {
            Some(cmd) => {
                debug!("[imap {}] {} {}", self.conn_id, cmd.tag, cmd.name);
                self.handle_command(&cmd).await
            }
            None if line.trim().is_empty() => String::new(),
            None => response::untagged("BAD Invalid command"),
        }
    }

    /// Handle a parsed IMAP command
    async fn handle_command(&mut self, cmd: &ImapCommand) -> String {
        let Some(kind) = cmd.kind() else {
            return response::bad(&cmd.tag, "Unknown command");
        };

        match kind {
            CommandKind::Capability => self.cmd_capability(cmd),
            CommandKind::Noop => response::ok(&cmd.tag, "NOOP completed"),
            CommandKind::Logout => self.cmd_logout(cmd),
            CommandKind::Login => self.cmd_login(cmd),
            CommandKind::Authenticate => self.cmd_authenticate(cmd),
            CommandKind::List => self.cmd_list(cmd, "LIST"),
            CommandKind::Lsub => self.cmd_list(cmd, "LSUB"),
            CommandKind::Status => self.cmd_status(cmd).await,
            CommandKind::Select => self.cmd_select(cmd, false).await,
            CommandKind::Examine => self.cmd_select(cmd, true).await,
            CommandKind::Close => self.cmd_close(cmd),
            CommandKind::Expunge => self.cmd_expunge(cmd).await,
            CommandKind::Fetch => self.cmd_fetch(cmd, false).await,
            CommandKind::Store => self.cmd_store(cmd, false).await,
            CommandKind::Search => self.cmd_search(cmd, false),
            CommandKind::Uid => self.cmd_uid(cmd).await,
        }
    }

    /// NO response when the session is not authenticated yet
    fn require_auth(&self, tag: &str) -> Option<String> {
        match self.state {
            ImapState::NotAuthenticated => Some(response::no(tag, "Not authenticated")),
            _ => None,
        }
    }

    fn require_selected(&self, tag: &str) -> Option<String> {
        match self.state {
            ImapState::Selected => None,
            ImapState::NotAuthenticated => Some(response::no(tag, "Not authenticated")),
            _ => Some(response::no(tag, "No mailbox selected")),
        }
    }

    fn cmd_capability(&self, cmd: &ImapCommand) -> String {
        let mut resp = response::capability();
        resp.push_str(&response::ok(&cmd.tag, "CAPABILITY completed"));
        resp
    }

    fn cmd_logout(&mut self, cmd: &ImapCommand) -> String {
        self.state = ImapState::Logout;
        self.mailbox = None;
        let mut resp = response::bye("e-Doreczenia IMAP gateway logging out");
        resp.push_str(&response::ok(&cmd.tag, "LOGOUT completed"));
        resp
    }

    fn cmd_login(&mut self, cmd: &ImapCommand) -> String {
        if self.state != ImapState::NotAuthenticated {
            return response::no(&cmd.tag, "Already authenticated");
        }

        if cmd.args.len() != 2 {
            return response::bad(&cmd.tag, "LOGIN requires username and password");
        }

        self.complete_login(&cmd.tag, &cmd.args[0], &cmd.args[1], "LOGIN")
    }

    fn complete_login(&mut self, tag: &str, username: &str, password: &str, command: &str) -> String {
        if self.ctx.auth.verify(username, password) {
            self.state = ImapState::Authenticated;
            info!("[imap {}] User {} authenticated", self.conn_id, username);
            response::ok(tag, &format!("{} completed", command))
        } else {
            warn!("[imap {}] Failed login for {}", self.conn_id, username);
            response::no(tag, "[AUTHENTICATIONFAILED] Invalid credentials")
        }
    }

    fn cmd_authenticate(&mut self, cmd: &ImapCommand) -> String {
        if self.state != ImapState::NotAuthenticated {
            return response::no(&cmd.tag, "Already authenticated");
        }

        if cmd.args.is_empty() || cmd.args.len() > 2 {
            return response::bad(&cmd.tag, "AUTHENTICATE requires a mechanism");
        }

        if !cmd.args[0].eq_ignore_ascii_case("PLAIN") {
            return response::no(&cmd.tag, "Unsupported authentication mechanism");
        }

        // Initial response provided inline (SASL-IR)
        if let Some(initial) = cmd.args.get(1) {
            return self.handle_auth_response(&cmd.tag, initial);
        }

        self.auth_in_progress = Some(cmd.tag.clone());
        response::continuation("")
    }

    fn handle_auth_response(&mut self, tag: &str, data: &str) -> String {
        let data = data.trim();

        // Client can abort with "*"
        if data == "*" {
            return response::bad(tag, "AUTHENTICATE aborted");
        }

        // "=" is an empty initial response
        let decoded = if data == "=" {
            Vec::new()
        } else {
            match base64::engine::general_purpose::STANDARD.decode(data) {
                Ok(d) => d,
                Err(_) => return response::no(tag, "[AUTHENTICATIONFAILED] Invalid base64"),
            }
        };

        match decode_sasl_plain(&decoded) {
            Some((username, password)) => {
                self.complete_login(tag, &username, &password, "AUTHENTICATE")
            }
            None => response::no(tag, "[AUTHENTICATIONFAILED] Invalid PLAIN format"),
        }
    }

    fn cmd_list(&self, cmd: &ImapCommand, command: &str) -> String {
        if let Some(resp) = self.require_auth(&cmd.tag) {
            return resp;
        }

        if cmd.args.len() != 2 {
            return response::bad(&cmd.tag, &format!("{} requires reference and pattern", command));
        }

        let mut resp = response::list_folders(command, &cmd.args[0], &cmd.args[1]);
        resp.push_str(&response::ok(&cmd.tag, &format!("{} completed", command)));
        resp
    }

    fn query(&self) -> MessageQuery {
        MessageQuery {
            limit: self.ctx.page_size,
            ..MessageQuery::default()
        }
    }

    async fn cmd_status(&self, cmd: &ImapCommand) -> String {
        if let Some(resp) = self.require_auth(&cmd.tag) {
            return resp;
        }

        if cmd.args.len() < 2 {
            return response::bad(&cmd.tag, "STATUS requires mailbox and items");
        }

        let Some(folder) = Folder::from_imap_name(&cmd.args[0]) else {
            return response::no(&cmd.tag, "[NONEXISTENT] Mailbox does not exist");
        };

        let messages = match self.ctx.api.get_messages(folder, self.query()).await {
            Ok(messages) => messages,
            Err(e) => return self.api_failure(&cmd.tag, "STATUS", &e),
        };
        self.ctx.registry.assign(folder, &messages);

        let mut items = Vec::new();
        for item in cmd.args[1..]
            .iter()
            .map(|a| a.trim_matches(|c| c == '(' || c == ')').to_ascii_uppercase())
            .filter(|a| !a.is_empty())
        {
            match item.as_str() {
                "MESSAGES" => items.push(format!("MESSAGES {}", messages.len())),
                "RECENT" => items.push(format!(
                    "RECENT {}",
                    messages.iter().filter(|m| m.flags.recent).count()
                )),
                "UNSEEN" => items.push(format!(
                    "UNSEEN {}",
                    messages.iter().filter(|m| !m.flags.seen).count()
                )),
                "UIDNEXT" => items.push(format!(
                    "UIDNEXT {}",
                    self.ctx.registry.uid_next(folder)
                )),
                "UIDVALIDITY" => items.push(format!(
                    "UIDVALIDITY {}",
                    self.ctx.registry.uid_validity()
                )),
                other => {
                    return response::bad(&cmd.tag, &format!("Unknown status item {}", other));
                }
            }
        }

        let mut resp = response::status(folder, &items);
        resp.push_str(&response::ok(&cmd.tag, "STATUS completed"));
        resp
    }

    async fn cmd_select(&mut self, cmd: &ImapCommand, read_only: bool) -> String {
        let command = if read_only { "EXAMINE" } else { "SELECT" };

        if let Some(resp) = self.require_auth(&cmd.tag) {
            return resp;
        }

        if cmd.args.len() != 1 {
            return response::bad(&cmd.tag, &format!("{} requires a mailbox name", command));
        }

        let Some(folder) = Folder::from_imap_name(&cmd.args[0]) else {
            return response::no(&cmd.tag, "[NONEXISTENT] Mailbox does not exist");
        };

        // A failed fetch keeps the previous state and selection
        let messages = match self.ctx.api.get_messages(folder, self.query()).await {
            Ok(messages) => messages,
            Err(e) => return self.api_failure(&cmd.tag, command, &e),
        };

        let snapshot = MailboxSnapshot::new(folder, messages, &self.ctx.registry, read_only);
        info!(
            "[imap {}] {} {} ({} messages)",
            self.conn_id,
            command,
            folder,
            snapshot.exists()
        );

        let mut resp = response::mailbox_status(&snapshot);
        resp.push_str(&response::ok(
            &cmd.tag,
            &format!(
                "[READ-{}] {} completed",
                if read_only { "ONLY" } else { "WRITE" },
                command
            ),
        ));

        self.mailbox = Some(snapshot);
        self.state = ImapState::Selected;
        resp
    }

    fn cmd_close(&mut self, cmd: &ImapCommand) -> String {
        if let Some(resp) = self.require_selected(&cmd.tag) {
            return resp;
        }

        self.mailbox = None;
        self.state = ImapState::Authenticated;
        response::ok(&cmd.tag, "CLOSE completed")
    }

    async fn cmd_expunge(&mut self, cmd: &ImapCommand) -> String {
        if let Some(resp) = self.require_selected(&cmd.tag) {
            return resp;
        }

        let api = Arc::clone(&self.ctx.api);
        let expunge_upstream = self.ctx.expunge_upstream;
        let Some(mailbox) = self.mailbox.as_mut() else {
            return response::no(&cmd.tag, "No mailbox selected");
        };

        if expunge_upstream {
            for seq in mailbox.deleted() {
                let Some(entry) = mailbox.get(seq) else {
                    continue;
                };
                if let Err(e) = api.update_status(&entry.message.id, MessageStatus::Deleted).await {
                    warn!("[imap {}] EXPUNGE failed: {}", self.conn_id, e);
                    return response::no(&cmd.tag, &format!("EXPUNGE failed: {}", e));
                }
            }
        }

        // Reported in descending order so each number is valid when sent
        let mut resp: String = mailbox
            .expunge()
            .into_iter()
            .map(response::expunge)
            .collect();
        resp.push_str(&response::ok(&cmd.tag, "EXPUNGE completed"));
        resp
    }

    async fn cmd_fetch(&self, cmd: &ImapCommand, use_uid: bool) -> String {
        if let Some(resp) = self.require_selected(&cmd.tag) {
            return resp;
        }

        if cmd.args.len() < 2 {
            return response::bad(&cmd.tag, "Missing sequence set or data items");
        }

        let Some(seq_set) = SequenceSet::parse(&cmd.args[0]) else {
            return response::bad(&cmd.tag, "Invalid sequence set");
        };

        // Join remaining args for fetch items (handles "(FLAGS BODY[...])")
        let mut items = FetchItems::parse(&cmd.args[1..].join(" "));
        if use_uid {
            items.uid = true;
        }
        // Rendered bodies are UTF-8 text; byte ranges could split characters
        if items.sections.iter().any(|r| r.partial) {
            return response::bad(&cmd.tag, "Partial fetch not supported");
        }

        let Some(mailbox) = self.mailbox.as_ref() else {
            return response::no(&cmd.tag, "No mailbox selected");
        };

        let mut resp = String::new();
        for seq in mailbox.resolve(&seq_set, use_uid) {
            let Some(entry) = mailbox.get(seq) else {
                continue;
            };

            let rendered = if items.needs_body() {
                match self.render(entry).await {
                    Ok(rendered) => Some(rendered),
                    Err(e) => return self.api_failure(&cmd.tag, "FETCH", &e),
                }
            } else {
                None
            };

            resp.push_str(&format_fetch_response(seq, entry, &items, rendered.as_ref()));
        }

        resp.push_str(&response::ok(&cmd.tag, "FETCH completed"));
        resp
    }

    /// Synthesize the message, pulling attachment contents when configured
    async fn render(&self, entry: &SnapshotEntry) -> Result<RenderedMessage, ApiError> {
        let message = &entry.message;
        let mut attachments: Vec<AttachmentData> = Vec::new();

        if self.ctx.fetch_attachments {
            for attachment in &message.attachments {
                let mut data = self
                    .ctx
                    .api
                    .get_attachment(&message.id, &attachment.id)
                    .await?;
                if data.filename == "attachment" && !attachment.filename.is_empty() {
                    data.filename = attachment.filename.clone();
                }
                attachments.push(data);
            }
        }

        Ok(response::render_message(message, &attachments))
    }

    async fn cmd_store(&mut self, cmd: &ImapCommand, use_uid: bool) -> String {
        if let Some(resp) = self.require_selected(&cmd.tag) {
            return resp;
        }

        if cmd.args.len() < 3 {
            return response::bad(&cmd.tag, "Missing arguments");
        }

        let Some(seq_set) = SequenceSet::parse(&cmd.args[0]) else {
            return response::bad(&cmd.tag, "Invalid sequence set");
        };

        let Some(action) = StoreAction::parse(&cmd.args[1]) else {
            return response::bad(&cmd.tag, "Invalid STORE data item");
        };

        let requested = MessageFlags::from_imap_string(&cmd.args[2..].join(" "));

        // An EXAMINEd mailbox is not guarded: STORE still writes \Seen upstream
        // even though SELECT answered [READ-ONLY] and PERMANENTFLAGS ()

        let api = Arc::clone(&self.ctx.api);
        let conn_id = self.conn_id;
        let Some(mailbox) = self.mailbox.as_mut() else {
            return response::no(&cmd.tag, "No mailbox selected");
        };

        let mut resp = String::new();
        for seq in mailbox.resolve(&seq_set, use_uid) {
            let Some(entry) = mailbox.get_mut(seq) else {
                continue;
            };

            let current = entry.message.flags;
            let mut updated = current;
            match action.mode {
                StoreMode::Add => updated.insert(requested),
                StoreMode::Remove => updated.remove(requested),
                StoreMode::Replace => updated.replace(requested),
            }

            // Upstream first; the snapshot only changes once the status call succeeded
            let sync_seen = match action.mode {
                StoreMode::Add | StoreMode::Remove => requested.seen,
                StoreMode::Replace => updated.seen != current.seen,
            };
            if sync_seen {
                let status = if updated.seen {
                    MessageStatus::Read
                } else {
                    MessageStatus::Unread
                };
                if let Err(e) = api.update_status(&entry.message.id, status).await {
                    warn!("[imap {}] STORE failed for {}: {}", conn_id, entry.message.id, e);
                    resp.push_str(&response::no(&cmd.tag, &format!("STORE failed: {}", e)));
                    return resp;
                }
            }

            entry.message.flags = updated;

            if !action.silent {
                let mut parts = Vec::new();
                if use_uid {
                    parts.push(format!("UID {}", entry.uid));
                }
                parts.push(format!("FLAGS {}", entry.message.flags.to_imap_string()));
                resp.push_str(&response::fetch_response(seq, &parts));
            }
        }

        resp.push_str(&response::ok(&cmd.tag, "STORE completed"));
        resp
    }

    fn cmd_search(&self, cmd: &ImapCommand, use_uid: bool) -> String {
        if let Some(resp) = self.require_selected(&cmd.tag) {
            return resp;
        }

        let keys = match SearchKey::parse_all(&cmd.args) {
            Ok(keys) => keys,
            Err(e) => return response::bad(&cmd.tag, &format!("Invalid search: {}", e)),
        };

        let Some(mailbox) = self.mailbox.as_ref() else {
            return response::no(&cmd.tag, "No mailbox selected");
        };

        let max_seq = mailbox.exists();
        let max_uid = mailbox.max_uid();
        let ids: Vec<u32> = mailbox
            .entries()
            .filter(|(seq, entry)| {
                keys.iter()
                    .all(|key| search_matches(key, *seq, entry, max_seq, max_uid))
            })
            .map(|(seq, entry)| if use_uid { entry.uid } else { seq })
            .collect();

        let mut resp = response::search(&ids);
        resp.push_str(&response::ok(&cmd.tag, "SEARCH completed"));
        resp
    }

    async fn cmd_uid(&mut self, cmd: &ImapCommand) -> String {
        if cmd.args.is_empty() {
            return response::bad(&cmd.tag, "Missing UID subcommand");
        }

        let subcmd = ImapCommand {
            tag: cmd.tag.clone(),
            name: cmd.args[0].to_uppercase(),
            args: cmd.args[1..].to_vec(),
        };

        match subcmd.kind() {
            Some(CommandKind::Fetch) => self.cmd_fetch(&subcmd, true).await,
            Some(CommandKind::Store) => self.cmd_store(&subcmd, true).await,
            Some(CommandKind::Search) => self.cmd_search(&subcmd, true),
            _ => response::bad(&cmd.tag, "Unknown UID subcommand"),
        }
    }

    fn api_failure(&self, tag: &str, command: &str, error: &ApiError) -> String {
        warn!("[imap {}] {} failed: {}", self.conn_id, command, error);
        response::no(tag, &format!("{} failed: {}", command, error))
    }
}

/// Split a SASL PLAIN message ([authzid] NUL authcid NUL password)
fn is_tag_char(c: char) -> bool {
    c.is_ascii_graphic() && !matches!(c, '(' | ')' | '{' | '%' | '*' | '"' | '\\' | '+')
}

fn decode_sasl_plain(decoded: &[u8]) -> Option<(String, String)> {
    let parts: Vec<&[u8]> = decoded.split(|&b| b == 0).collect();
    let (username, password) = match parts.as_slice() {
        [_authzid, authcid, password] => (authcid, password),
        [authcid, password] => (authcid, password),
        _ => return None,
    };
    Some((
        String::from_utf8_lossy(username).to_string(),
        String::from_utf8_lossy(password).to_string(),
    ))
}

fn format_fetch_response(
    seq: u32,
    entry: &SnapshotEntry,
    items: &FetchItems,
    rendered: Option<&RenderedMessage>,
) -> String {
    let msg = &entry.message;
    let mut parts = Vec::new();

    if items.uid {
        parts.push(format!("UID {}", entry.uid));
    }

    if items.flags {
        parts.push(format!("FLAGS {}", msg.flags.to_imap_string()));
    }

    if items.internal_date {
        parts.push(format!(
            "INTERNALDATE {}",
            response::format_internal_date(&msg.received_at)
        ));
    }

    if items.envelope {
        parts.push(format!("ENVELOPE {}", response::envelope(msg)));
    }

    if let Some(rendered) = rendered {
        if items.rfc822_size {
            parts.push(format!("RFC822.SIZE {}", rendered.size()));
        }
        if items.body_structure {
            parts.push(format!("BODYSTRUCTURE {}", rendered.body_structure));
        }
        if items.rfc822_header {
            parts.push(response::literal("RFC822.HEADER", &rendered.header));
        }
        if items.rfc822_text {
            parts.push(response::literal("RFC822.TEXT", &rendered.body));
        }
        if items.rfc822 {
            parts.push(response::literal("RFC822", &rendered.full()));
        }
        for request in &items.sections {
            let data = match &request.section {
                BodySection::Full => rendered.full(),
                BodySection::Header => rendered.header.clone(),
                BodySection::HeaderFields(fields) => rendered.header_fields(fields),
                BodySection::Text => rendered.body.clone(),
            };
            parts.push(response::literal(&format!("BODY[{}]", request.label), &data));
        }
    }

    response::fetch_response(seq, &parts)
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Evaluate one SEARCH key against a snapshot entry
fn search_matches(key: &SearchKey, seq: u32, entry: &SnapshotEntry, max_seq: u32, max_uid: u32) -> bool {
    let msg = &entry.message;
    let flags = &msg.flags;
    match key {
        SearchKey::All => true,
        SearchKey::Seen => flags.seen,
        SearchKey::Unseen => !flags.seen,
        SearchKey::Answered => flags.answered,
        SearchKey::Unanswered => !flags.answered,
        SearchKey::Deleted => flags.deleted,
        SearchKey::Undeleted => !flags.deleted,
        SearchKey::Flagged => flags.flagged,
        SearchKey::Unflagged => !flags.flagged,
        SearchKey::Draft => flags.draft,
        SearchKey::Undraft => !flags.draft,
        SearchKey::New => flags.recent && !flags.seen,
        SearchKey::Old => !flags.recent,
        SearchKey::Recent => flags.recent,
        SearchKey::Subject(s) => contains_ci(&msg.subject, s),
        SearchKey::From(s) => {
            contains_ci(&msg.sender, s)
                || msg.sender_name.as_deref().is_some_and(|n| contains_ci(n, s))
        }
        SearchKey::To(s) => msg.recipients.iter().any(|r| contains_ci(r, s)),
        SearchKey::Body(s) => {
            contains_ci(&msg.content, s)
                || msg.content_html.as_deref().is_some_and(|h| contains_ci(h, s))
        }
        SearchKey::Text(s) => {
            search_matches(&SearchKey::Subject(s.clone()), seq, entry, max_seq, max_uid)
                || search_matches(&SearchKey::From(s.clone()), seq, entry, max_seq, max_uid)
                || search_matches(&SearchKey::To(s.clone()), seq, entry, max_seq, max_uid)
                || search_matches(&SearchKey::Body(s.clone()), seq, entry, max_seq, max_uid)
        }
        SearchKey::Uid(set) => set.contains(entry.uid, max_uid),
        SearchKey::Sequence(set) => set.contains(seq, max_seq),
        SearchKey::Not(inner) => !search_matches(inner, seq, entry, max_seq, max_uid),
        SearchKey::Or(a, b) => {
            search_matches(a, seq, entry, max_seq, max_uid)
                || search_matches(b, seq, entry, max_seq, max_uid)
        }
        SearchKey::Unsupported(_) => true,
    }
}
