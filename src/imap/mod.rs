//! IMAP4rev1 front end: command parsing, mailbox snapshots and the per-connection session.

mod command;
mod mailbox;
mod response;
mod session;

pub use mailbox::UidRegistry;
pub use session::{ImapContext, ImapSession, ImapState};
