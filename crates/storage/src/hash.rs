use sha2::{Digest, Sha256};

/// Hex characters of the payload digest kept in a rule-set id.
pub const FINGERPRINT_LEN: usize = 8;

/// Lowercase hex SHA-256 of a serialized rule set.
pub fn payload_digest(payload: &[u8]) -> String {
    Sha256::digest(payload)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Short digest used to tell apart rule sets mined in the same microsecond.
pub fn payload_fingerprint(payload: &[u8]) -> String {
    let mut digest = payload_digest(payload);
    digest.truncate(FINGERPRINT_LEN);
    digest
}
