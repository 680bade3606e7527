use rand::RngCore;
use sha2::{Digest, Sha256};

/// 256 bits from the OS CSPRNG, hex encoded.
pub fn generate_token() -> String {
    let mut token_bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut token_bytes);
    hex::encode(token_bytes)
}

/// SHA-256 of a token, for tokens that are stored by digest only.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
