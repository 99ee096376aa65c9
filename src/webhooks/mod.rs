/// Inbound payment webhook verification
pub mod signature;

pub use signature::{sign_payload, signature_header, WebhookVerifier, SIGNATURE_HEADER};
