//! Identifier generators

use rand::Rng;

use crate::types::via::BRANCH_MAGIC_COOKIE;

fn random_hex(len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| HEX[rng.gen_range(0..16)] as char)
        .collect()
}

/// A new RFC 3261 branch parameter (`z9hG4bK` + random)
pub fn generate_branch() -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, random_hex(24))
}

/// A new From/To tag
pub fn generate_tag() -> String {
    random_hex(16)
}

/// A new Call-ID, optionally qualified with a host
pub fn generate_call_id(host: Option<&str>) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    match host {
        Some(host) => format!("{}@{}", id, host),
        None => id,
    }
}
