/// SMTP submission front end: every accepted DATA becomes one send-message call
mod command;
mod mime;
mod response;
mod session;
mod transaction;

pub use mime::{build_outgoing, MimeError};
pub use session::{SmtpContext, SmtpSession, SmtpState};
