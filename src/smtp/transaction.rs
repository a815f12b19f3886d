/// Envelope of one mail transaction, alive from MAIL FROM until DATA completes
#[derive(Debug, Clone, Default)]
pub struct MailTransaction {
    /// Reverse path (MAIL FROM address)
    pub mail_from: Option<String>,
    /// Forward paths as given by the client, before translation
    pub rcpt_to: Vec<String>,
    /// DATA payload as received, still dot-stuffed
    pub data: Vec<u8>,
}

impl MailTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.mail_from = None;
        self.rcpt_to.clear();
        self.data.clear();
    }

    pub fn start(&mut self, address: String) {
        self.reset();
        self.mail_from = Some(address);
    }

    pub fn add_rcpt_to(&mut self, address: String) {
        self.rcpt_to.push(address);
    }

    pub fn has_mail_from(&self) -> bool {
        self.mail_from.is_some()
    }

    pub fn has_recipients(&self) -> bool {
        !self.rcpt_to.is_empty()
    }

    /// Hand the finished transaction out, leaving an empty one behind
    pub fn take(&mut self) -> MailTransaction {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_hands_out_payload() {
        let mut tx = MailTransaction::new();
        tx.start("me@example.com".to_string());
        tx.add_rcpt_to("you@example.com".to_string());
        tx.data.extend_from_slice(b"Subject: x\r\n\r\nbody");

        let done = tx.take();
        assert_eq!(done.mail_from.as_deref(), Some("me@example.com"));
        assert_eq!(done.rcpt_to, vec!["you@example.com".to_string()]);
        assert_eq!(done.data, b"Subject: x\r\n\r\nbody");
        assert!(!tx.has_mail_from() && !tx.has_recipients() && tx.data.is_empty());

        tx.start("a@example.com".to_string());
        tx.data.push(b'x');
        tx.start("b@example.com".to_string());
        assert!(tx.data.is_empty());
    }
}
