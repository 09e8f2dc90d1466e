//! Message-id generation.
//!
//! Every backbone packet carries a 16-byte random `messageId` (§3). IDs are
//! generated once at encode time and hex-encoded whenever they appear in
//! logs, matching the spec's "hex-encoded in logs" note.

use rand::RngCore;

pub const MESSAGE_ID_LEN: usize = 16;

/// Generate a fresh random messageId.
pub fn generate() -> [u8; MESSAGE_ID_LEN] {
    let mut id = [0u8; MESSAGE_ID_LEN];
    rand::rng().fill_bytes(&mut id);
    id
}

/// Hex-encode a messageId for logging.
pub fn to_hex(id: &[u8; MESSAGE_ID_LEN]) -> String {
    let mut s = String::with_capacity(MESSAGE_ID_LEN * 2);
    for b in id {
        s.push_str(&format!("{b:02x}"));
    }
    s
}
