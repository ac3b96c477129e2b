//! Random, URL-safe identifiers for access tokens and stored filenames

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};

use crate::{Error, Result};

/// Random bytes behind an access token (43 characters once encoded)
pub const ACCESS_TOKEN_BYTES: usize = 32;

/// Random bytes behind a stored filename stem
pub const STORED_NAME_BYTES: usize = 16;

/// Generate a token from `byte_len` bytes of OS entropy.
///
/// The output alphabet is `A-Z a-z 0-9 - _`, so it can be placed in a URL
/// path without percent-encoding. A failing entropy source is reported as
/// [`Error::Entropy`]; there is no fallback to a weaker generator.
pub fn generate(byte_len: usize) -> Result<String> {
    let mut bytes = vec![0u8; byte_len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::Entropy(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Mint a new access token
pub fn access_token() -> Result<String> {
    generate(ACCESS_TOKEN_BYTES)
}

/// Length of an encoded token built from `byte_len` bytes
pub fn encoded_len(byte_len: usize) -> usize {
    (byte_len * 4).div_ceil(3)
}

/// Cheap syntactic check for a path-supplied token.
///
/// Anything that fails here can never match a stored token, so callers may
/// skip the store lookup entirely.
pub fn looks_like_token(candidate: &str) -> bool {
    candidate.len() == encoded_len(ACCESS_TOKEN_BYTES)
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Shortened form for log lines; the full token is a bearer credential.
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{}…", prefix)
}
