//! Error Classifier: maps HTTP responses and transport failures to a typed
//! hierarchy, a single `ErrorKind` discriminant covering every failure mode.

use serde::Deserialize;
use std::fmt;

/// Categories of errors returned by the client.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
	/// `4xx`/`5xx` response carrying a JSON body with a `code`/`msg`.
	Api {
		/// Server-reported error code, when present.
		code: Option<String>,
		/// HTTP status.
		status: u16,
	},
	/// `502`/`503`/`504`, or a transport failure that is safe to retry.
	RetryableFetch {
		/// HTTP status, or `0` for a transport-level failure.
		status: u16,
	},
	/// A non-2xx response whose body was not JSON.
	Unknown {
		/// HTTP status.
		status: u16,
	},
	/// A `set_session`/`get_session` call found no local session.
	SessionMissing,
	/// The token endpoint returned something that doesn't look like a session.
	InvalidTokenResponse,
	/// A client-side precondition failed before any request was sent.
	InvalidCredentials,
	/// `422 weak_password` with `reasons`.
	WeakPassword {
		/// Server-reported weak-password reasons.
		reasons: Vec<String>,
	},
	/// PKCE code exchange found no stored verifier.
	PkceGrantCodeExchange,
	/// `with_lock` timed out or failed fast on `timeout_ms == 0`.
	LockAcquireTimeout,
	/// Realtime/Functions relay signalled `x-relay-error: true`.
	Relay,
	/// The underlying fetch/transport raised (connect refused, DNS, abort).
	Fetch,
	/// Miscellaneous I/O, parse or internal failure.
	Internal,
}

/// Error type returned by the client.
#[derive(Clone, Debug, PartialEq)]
pub struct Error {
	kind: ErrorKind,
	message: String,
	/// Raw response body or exception text, kept for callers that want it.
	context: Option<String>,
}

impl Error {
	/// Builds an error from a kind and a message.
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
			context: None,
		}
	}

	/// Attaches raw context (response body, exception text) to the error.
	#[must_use]
	pub fn with_context(mut self, context: impl Into<String>) -> Self {
		self.context = Some(context.into());
		self
	}

	/// Returns the kind of an error.
	pub const fn kind(&self) -> &ErrorKind {
		&self.kind
	}

	/// Returns the raw context, if any.
	pub fn context(&self) -> Option<&str> {
		self.context.as_deref()
	}

	/// Whether a retry loop should attempt this operation again.
	pub const fn is_retryable(&self) -> bool {
		matches!(self.kind, ErrorKind::RetryableFetch { .. })
	}

	pub(crate) fn session_missing() -> Self {
		Self::new(ErrorKind::SessionMissing, "auth session missing")
	}

	pub(crate) fn invalid_token_response(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::InvalidTokenResponse, message)
	}

	pub(crate) fn invalid_credentials(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::InvalidCredentials, message)
	}

	pub(crate) fn pkce_grant_code_exchange() -> Self {
		Self::new(ErrorKind::PkceGrantCodeExchange, "no code verifier found for this flow")
	}

	pub(crate) fn lock_acquire_timeout(name: &str) -> Self {
		Self::new(ErrorKind::LockAcquireTimeout, format!("timed out acquiring lock `{name}`"))
	}

	/// Synthesized client-side when a `maybeSingle()` GET unexpectedly
	/// returns more than one row.
	pub(crate) fn pgrst116_multiple_rows() -> Self {
		Self::new(
			ErrorKind::Api {
				code: Some("PGRST116".to_string()),
				status: 406,
			},
			"JSON object requested, multiple (or no) rows returned",
		)
	}
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.message)
	}
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Deserialize)]
struct WeakPasswordBody {
	reasons: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
	#[serde(alias = "error_code", alias = "code")]
	code: Option<String>,
	#[serde(alias = "msg", alias = "message", alias = "error_description")]
	msg: Option<String>,
	weak_password: Option<WeakPasswordBody>,
}

/// Classifies an HTTP response. `relay_header` is the value of
/// the `x-relay-error` response header, when the caller is the
/// Realtime/Functions flavor that defines one.
pub fn classify_response(
	status: u16,
	body: &[u8],
	relay_header: Option<&str>,
) -> Option<Error> {
	if relay_header == Some("true") {
		return Some(Error::new(ErrorKind::Relay, "relay reported an error").with_context(
			String::from_utf8_lossy(body).into_owned(),
		));
	}
	if (502..=504).contains(&status) {
		return Some(Error::new(ErrorKind::RetryableFetch { status }, "upstream unavailable"));
	}
	if (200..300).contains(&status) {
		return None;
	}
	if (400..500).contains(&status) {
		if let Ok(parsed) = serde_json::from_slice::<ApiErrorBody>(body) {
			if parsed.code.as_deref() == Some("weak_password") {
				let reasons = parsed.weak_password.map(|w| w.reasons).unwrap_or_default();
				return Some(Error::new(
					ErrorKind::WeakPassword {
						reasons,
					},
					parsed.msg.unwrap_or_else(|| "password does not meet requirements".into()),
				));
			}
			let message = parsed.msg.clone().unwrap_or_else(|| format!("request failed with status {status}"));
			return Some(
				Error::new(
					ErrorKind::Api {
						code: parsed.code,
						status,
					},
					message,
				)
				.with_context(String::from_utf8_lossy(body).into_owned()),
			);
		}
		return Some(
			Error::new(ErrorKind::Unknown { status }, format!("request failed with status {status}"))
				.with_context(String::from_utf8_lossy(body).into_owned()),
		);
	}
	if status >= 400 {
		return Some(
			Error::new(ErrorKind::Unknown { status }, format!("request failed with status {status}"))
				.with_context(String::from_utf8_lossy(body).into_owned()),
		);
	}
	None
}

/// Classifies a transport-level failure (connect refused, DNS, abort).
pub fn classify_transport(error: &reqwest::Error) -> Error {
	if error.is_timeout() || error.is_connect() {
		return Error::new(ErrorKind::RetryableFetch { status: 0 }, "transport error").with_context(error.to_string());
	}
	Error::new(ErrorKind::Fetch, "fetch failed").with_context(error.to_string())
}

impl From<reqwest::Error> for Error {
	fn from(error: reqwest::Error) -> Self {
		classify_transport(&error)
	}
}

impl From<serde_json::Error> for Error {
	fn from(error: serde_json::Error) -> Self {
		Self::new(ErrorKind::Internal, "failed to (de)serialize JSON").with_context(error.to_string())
	}
}

impl From<url::ParseError> for Error {
	fn from(error: url::ParseError) -> Self {
		Self::new(ErrorKind::Internal, "failed to parse URL").with_context(error.to_string())
	}
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
	fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
		Self::new(ErrorKind::Fetch, "websocket error").with_context(error.to_string())
	}
}

impl<T> From<flume::SendError<T>> for Error {
	fn from(_error: flume::SendError<T>) -> Self {
		Self::new(ErrorKind::Internal, "internal channel closed")
	}
}

impl From<flume::RecvError> for Error {
	fn from(_error: flume::RecvError) -> Self {
		Self::new(ErrorKind::Internal, "internal channel closed")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_retryable_status() {
		let error = classify_response(503, b"", None).unwrap();
		assert!(error.is_retryable());
	}

	#[test]
	fn classifies_success_as_none() {
		assert!(classify_response(204, b"", None).is_none());
	}

	#[test]
	fn classifies_weak_password() {
		let body = br#"{"error_code":"weak_password","msg":"too short","weak_password":{"reasons":["length"]}}"#;
		let error = classify_response(422, body, None).unwrap();
		match error.kind() {
			ErrorKind::WeakPassword {
				reasons,
			} => assert_eq!(reasons, &vec!["length".to_string()]),
			other => panic!("unexpected kind {other:?}"),
		}
	}

	#[test]
	fn classifies_unknown_non_json_body() {
		let error = classify_response(500, b"<html>oops</html>", None).unwrap();
		assert!(matches!(error.kind(), ErrorKind::Unknown {
			status: 500
		}));
	}

	#[test]
	fn relay_header_wins_regardless_of_status() {
		let error = classify_response(200, b"{}", Some("true")).unwrap();
		assert!(matches!(error.kind(), ErrorKind::Relay));
	}

	#[test]
	fn classifies_api_error_with_code() {
		let body = br#"{"code":"invalid_grant","msg":"bad credentials"}"#;
		let error = classify_response(400, body, None).unwrap();
		match error.kind() {
			ErrorKind::Api {
				code,
				status,
			} => {
				assert_eq!(code.as_deref(), Some("invalid_grant"));
				assert_eq!(*status, 400);
			}
			other => panic!("unexpected kind {other:?}"),
		}
	}
}
