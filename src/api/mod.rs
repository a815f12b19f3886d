//! Client for the upstream e-Doręczenia REST API

mod client;
mod token;
mod types;

#[cfg(test)]
pub use client::MockDeliveryApi;
pub use client::{ApiClient, DeliveryApi};
pub use token::OAuth2Token;
pub use types::{
    AttachmentData, MessageQuery, OutgoingAttachment, OutgoingMessage, Recipient, SendReceipt,
};
