//! Credential obfuscation at rest: XOR against a SHA-256-derived
//! machine-id salt, base64-encoded, `ENC:` prefix. Tolerates a legacy
//! bare-base64-with-colon format for migration. Grounded on
//! `tools/key_encryptor.py`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

const PREFIX: &str = "ENC:";

const SENSITIVE_KEYS: &[&str] = &["api_key", "token", "secret", "password", "credential", "key"];

pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|k| lower.contains(k))
}

pub fn obfuscate_if_sensitive(key: &str, value: &str) -> String {
    if is_sensitive_key(key) {
        encrypt(value)
    } else {
        value.to_string()
    }
}

fn machine_salt() -> Vec<u8> {
    let id = machine_id();
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.finalize().to_vec()
}

fn machine_id() -> String {
    std::env::var("DESKJARVIS_MACHINE_ID")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "default-machine".to_string())
}

/// `plaintext` -> `ENC:<base64(xor(plaintext, salt))>`.
pub fn encrypt(plaintext: &str) -> String {
    let salt = machine_salt();
    let xored: Vec<u8> = plaintext
        .as_bytes()
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ salt[i % salt.len()])
        .collect();
    format!("{}{}", PREFIX, STANDARD.encode(xored))
}

/// Inverse of `encrypt`. Accepts legacy `base64:...` format (migration)
/// and plaintext input unchanged (per the round-trip property in §8).
pub fn decrypt(stored: &str) -> String {
    if let Some(encoded) = stored.strip_prefix(PREFIX) {
        return decode_xored(encoded).unwrap_or_else(|| stored.to_string());
    }
    if let Some(rest) = stored.strip_prefix("base64:") {
        return decode_xored(rest).unwrap_or_else(|| stored.to_string());
    }
    stored.to_string()
}

/// Alias kept for call-site clarity at read paths.
pub fn deobfuscate(stored: &str) -> String {
    decrypt(stored)
}

fn decode_xored(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded).ok()?;
    let salt = machine_salt();
    let xored: Vec<u8> = bytes.iter().enumerate().map(|(i, b)| b ^ salt[i % salt.len()]).collect();
    String::from_utf8(xored).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let secret = "sk-test-1234567890";
        let enc = encrypt(secret);
        assert!(enc.starts_with(PREFIX));
        assert_eq!(decrypt(&enc), secret);
    }

    #[test]
    fn decrypt_plaintext_is_identity() {
        assert_eq!(decrypt("plain-value"), "plain-value");
    }

    #[test]
    fn sensitive_key_detection() {
        assert!(is_sensitive_key("OPENAI_API_KEY"));
        assert!(is_sensitive_key("user_password"));
        assert!(!is_sensitive_key("sandbox_path"));
    }
}
