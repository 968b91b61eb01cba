use sha2::{Digest, Sha256};

use crate::Hash256;

pub fn sha256d(bytes: &[u8]) -> Hash256 {
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(first);
    second.into()
}

pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from_digit((byte >> 4) as u32, 16).unwrap_or('?'));
        out.push(char::from_digit((byte & 0x0f) as u32, 16).unwrap_or('?'));
    }
    out
}
