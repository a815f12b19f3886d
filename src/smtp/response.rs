/// SMTP reply codes and messages according to RFC 5321
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Format response for transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }

    /// Multi-line reply: every line but the last uses the "code-" form
    pub fn multiline(code: u16, lines: &[String]) -> Vec<u8> {
        let mut result = String::new();
        for (i, line) in lines.iter().enumerate() {
            let sep = if i + 1 == lines.len() { ' ' } else { '-' };
            result.push_str(&format!("{}{}{}\r\n", code, sep, line));
        }
        result.into_bytes()
    }

    /// 220 - Service ready
    pub fn service_ready(domain: &str) -> Self {
        Self::new(220, format!("{} ESMTP e-Doreczenia gateway ready", domain))
    }

    /// 221 - Service closing
    pub fn service_closing(domain: &str) -> Self {
        Self::new(221, format!("{} Service closing transmission channel", domain))
    }

    /// 250 - Requested action okay
    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(250, message)
    }

    /// 250 - Message accepted by the delivery API
    pub fn queued(message_id: &str) -> Self {
        Self::new(250, format!("OK: Message queued as {}", message_id))
    }

    /// 252 - VRFY is not supported
    pub fn cannot_verify() -> Self {
        Self::new(252, "Cannot VRFY user, but will accept message and attempt delivery")
    }

    /// 354 - Start mail input
    pub fn start_mail_input() -> Self {
        Self::new(354, "Start mail input; end with <CRLF>.<CRLF>")
    }

    /// 451 - Upstream failure, the client may retry
    pub fn temporary_failure(detail: impl std::fmt::Display) -> Self {
        Self::new(451, format!("4.3.0 Temporary error: {}", detail))
    }

    /// 500 - Syntax error, command unrecognized
    pub fn syntax_error() -> Self {
        Self::new(500, "Syntax error, command unrecognized")
    }

    /// 500 - Command line over the length limit
    pub fn line_too_long() -> Self {
        Self::new(500, "5.5.2 Line too long")
    }

    /// 501 - Syntax error in parameters
    pub fn syntax_error_params() -> Self {
        Self::new(501, "Syntax error in parameters or arguments")
    }

    /// 502 - Command not implemented
    pub fn not_implemented() -> Self {
        Self::new(502, "Command not implemented")
    }

    /// 503 - Bad sequence of commands
    pub fn bad_sequence() -> Self {
        Self::new(503, "Bad sequence of commands")
    }

    /// 504 - Unsupported AUTH mechanism
    pub fn unrecognized_mechanism() -> Self {
        Self::new(504, "5.5.4 Unrecognized authentication type")
    }

    /// 552 - Exceeded storage allocation
    pub fn storage_exceeded() -> Self {
        Self::new(552, "5.3.4 Message size exceeds fixed maximum message size")
    }

    /// 554 - Transaction failed permanently
    pub fn transaction_failed(detail: impl std::fmt::Display) -> Self {
        Self::new(554, format!("5.6.0 Transaction failed: {}", detail))
    }

    /// 235 - Authentication successful
    pub fn auth_successful() -> Self {
        Self::new(235, "2.7.0 Authentication successful")
    }

    /// 334 - Authentication continuation (base64 encoded challenge)
    pub fn auth_continue(challenge: &str) -> Self {
        Self::new(334, challenge)
    }

    /// 501 - Client cancelled the AUTH exchange
    pub fn auth_cancelled() -> Self {
        Self::new(501, "5.7.0 Authentication cancelled")
    }

    /// 530 - Authentication required
    pub fn auth_required() -> Self {
        Self::new(530, "5.7.0 Authentication required")
    }

    /// 535 - Authentication credentials invalid
    pub fn auth_failed() -> Self {
        Self::new(535, "5.7.8 Authentication credentials invalid")
    }
}
