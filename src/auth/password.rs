use sha2::{Digest, Sha256};

/// Hash a password for storage.
pub fn hash_password(plaintext: &str) -> Result<String, bcrypt::BcryptError> {
    hash_password_with_cost(plaintext, bcrypt::DEFAULT_COST)
}

pub fn hash_password_with_cost(plaintext: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(plaintext, cost)
}

/// Check a password against a stored hash. Accepts bcrypt hashes and the
/// older unsalted hex SHA-256 digests still present in imported user files.
pub fn verify_password(plaintext: &str, stored: &str) -> bool {
    if stored.starts_with("$2") {
        return bcrypt::verify(plaintext, stored).unwrap_or(false);
    }
    if is_sha256_hex(stored) {
        let digest = hex::encode(Sha256::digest(plaintext.as_bytes()));
        return digest.eq_ignore_ascii_case(stored);
    }
    false
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}
