//! JWT claim decoding and tolerant base64url.
//!
//! No signature verification is performed — claims are parsed for their
//! `exp`/`sub`/etc, never trusted as proof of authenticity.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

/// Decodes a JWT's payload claims without verifying its signature.
///
/// Returns `None` if the token does not have exactly three `.`-separated
/// parts, if the middle part isn't valid base64url, or if it doesn't parse
/// as JSON.
pub fn decode_claims(token: &str) -> Option<Value> {
	let mut parts = token.split('.');
	let _header = parts.next()?;
	let payload = parts.next()?;
	if parts.next().is_none() {
		return None;
	}
	if parts.next().is_some() {
		return None;
	}
	let bytes = decode_base64url(payload)?;
	serde_json::from_slice(&bytes).ok()
}

/// Decodes a base64url string, tolerating padded input and surrounding
/// whitespace.
pub fn decode_base64url(input: &str) -> Option<Vec<u8>> {
	let trimmed: String = input.chars().filter(|c| !c.is_whitespace()).collect();
	let unpadded = trimmed.trim_end_matches('=');
	URL_SAFE_NO_PAD.decode(unpadded).ok()
}

/// Encodes bytes as unpadded base64url.
pub fn encode_base64url(input: &[u8]) -> String {
	URL_SAFE_NO_PAD.encode(input)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_claims_from_a_well_formed_token() {
		let payload = encode_base64url(br#"{"sub":"u1","exp":123}"#);
		let token = format!("eyJhbGciOiJIUzI1NiJ9.{payload}.signature");
		let claims = decode_claims(&token).unwrap();
		assert_eq!(claims["sub"], "u1");
		assert_eq!(claims["exp"], 123);
	}

	#[test]
	fn rejects_malformed_tokens() {
		assert!(decode_claims("not-a-jwt").is_none());
		assert!(decode_claims("a.b").is_none());
		assert!(decode_claims("a.b.c.d").is_none());
	}

	#[test]
	fn base64url_round_trips_multibyte_text() {
		let original = "hello 👋 world";
		let encoded = encode_base64url(original.as_bytes());
		let decoded = decode_base64url(&encoded).unwrap();
		assert_eq!(String::from_utf8(decoded).unwrap(), original);
	}

	#[test]
	fn base64url_tolerates_padding_and_whitespace() {
		let encoded = base64::engine::general_purpose::URL_SAFE.encode(b"pad me");
		let padded_with_whitespace = format!(" {encoded} \n");
		let decoded = decode_base64url(&padded_with_whitespace).unwrap();
		assert_eq!(decoded, b"pad me");
	}
}
