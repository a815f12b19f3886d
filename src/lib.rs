//! IMAP/SMTP gateway for the e-Doręczenia registered-delivery system.
//!
//! Mail clients talk plain IMAP4rev1 and SMTP to this process; every
//! operation is translated into calls against the OAuth2-secured delivery
//! REST API.

pub mod api;
pub mod config;
pub mod error;
pub mod imap;
pub mod logging;
pub mod model;
pub mod server;
pub mod smtp;

pub use error::{ApiError, GatewayError};
