use rand::RngCore;

/// length of a full layer id in hex characters
pub const FULL_LEN: usize = 64;

/// length of the short display prefix
pub const SHORT_LEN: usize = 12;

/// generate a fresh 64-hex-character layer id
///
/// ids whose first 12 characters parse as a decimal integer are redrawn so
/// that a short id can never be mistaken for a numeric command-line argument.
pub fn generate() -> String {
    let mut bytes = [0u8; FULL_LEN / 2];
    loop {
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let id = hex::encode(bytes);
        if short(&id).parse::<u64>().is_err() {
            return id;
        }
    }
}

/// the 12-character display prefix of an id (shorter ids are returned whole)
pub fn short(id: &str) -> &str {
    if id.len() < SHORT_LEN {
        id
    } else {
        &id[..SHORT_LEN]
    }
}
