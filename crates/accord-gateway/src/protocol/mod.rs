//! Gateway wire protocol
//!
//! Opcodes, close-code classification, and payload structures for the
//! Discord gateway (API v10, JSON encoding).

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{classify_close, close_code_description, CloseAction};
pub use messages::GatewayPayload;
pub use opcodes::OpCode;
pub use payloads::{
    ConnectionProperties, HelloPayload, IdentifyPayload, ReadyPayload, ResumePayload,
};

/// Gateway protocol version requested in the connection URL
pub const GATEWAY_VERSION: u8 = 10;

/// Build the gateway URL query for a base URL
#[must_use]
pub fn gateway_url(base: &str, compress: bool) -> String {
    let mut url = format!("{}/?v={}&encoding=json", base.trim_end_matches('/'), GATEWAY_VERSION);
    if compress {
        url.push_str("&compress=zlib-stream");
    }
    url
}
