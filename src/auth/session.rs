//! Session type and its storage persistence.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};
use crate::jwt::decode_claims;

/// Slack subtracted from `expires_at` when deciding whether a session needs
/// refreshing.
pub const EXPIRY_MARGIN_MS: i64 = 90_000;

/// The session exclusively owned by the Session Engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
	pub access_token: String,
	pub refresh_token: String,
	pub expires_in: i64,
	pub expires_at: i64,
	#[serde(default = "default_token_type")]
	pub token_type: String,
	pub user: Value,
}

fn default_token_type() -> String {
	"bearer".to_string()
}

impl Session {
	/// Builds a session from a token response, deriving `expires_at` from
	/// the server value if present, else `now_s + expires_in`.
	pub fn new(access_token: String, refresh_token: String, expires_in: i64, expires_at: Option<i64>, user: Value, now_s: i64) -> Self {
		Self {
			access_token,
			refresh_token,
			expires_in,
			expires_at: expires_at.unwrap_or(now_s + expires_in),
			token_type: default_token_type(),
			user,
		}
	}

	/// Builds a session directly from an access token's claims, the way
	/// `set_session` derives one without a fresh server round-trip.
	pub fn from_claims(access_token: String, refresh_token: String, user: Value) -> Result<Self> {
		let claims = decode_claims(&access_token).ok_or_else(|| Error::new(ErrorKind::InvalidTokenResponse, "access token is not a well-formed JWT"))?;
		let expires_at = claims.get("exp").and_then(Value::as_i64).ok_or_else(|| Error::new(ErrorKind::InvalidTokenResponse, "access token has no exp claim"))?;
		Ok(Self {
			access_token,
			refresh_token,
			expires_in: 0,
			expires_at,
			token_type: default_token_type(),
			user,
		})
	}

	/// Whether this session is within `EXPIRY_MARGIN_MS` of expiring (or
	/// already expired), as of `now_ms`.
	pub fn is_expired(&self, now_ms: i64) -> bool {
		self.expires_at * 1000 - now_ms <= EXPIRY_MARGIN_MS
	}

	/// Ticks remaining until expiry, in units of `tick_duration_ms`.
	pub fn ticks_until_expiry(&self, now_ms: i64, tick_duration_ms: i64) -> i64 {
		(self.expires_at * 1000 - now_ms) / tick_duration_ms
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn expires_at_defaults_from_expires_in() {
		let session = Session::new("a".to_string(), "r".to_string(), 3600, None, Value::Null, 1_000);
		assert_eq!(session.expires_at, 4_600);
	}

	#[test]
	fn is_expired_respects_margin() {
		let session = Session::new("a".to_string(), "r".to_string(), 3600, None, Value::Null, 0);
		assert!(session.is_expired(3_600_000 - 1_000));
		assert!(!session.is_expired(0));
	}
}
