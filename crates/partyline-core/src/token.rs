use rand::Rng;

/// Random bytes per reconnection token.
pub const TOKEN_BYTES: usize = 32;

/// Issue an opaque reconnection token: 32 random bytes, hex-encoded.
pub fn issue_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}
