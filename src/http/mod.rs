//! HTTP Plane: auth-wrapped request execution, header precedence, timeout
//! merging.
//!
//! The shared `reqwest::Client` is built once, with default headers
//! preconfigured, and reused for every request; per-call headers are merged
//! onto each `RequestBuilder` afterwards.

use std::time::Duration;

use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{self, Error, Result};

const SDK_NAME: &str = "supabase-rs";
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
const API_VERSION: &str = "2024-01-01";

/// Request body, auto-encoded per the target content type (Functions flavor
/// rules; PostgREST/Auth always send JSON).
#[derive(Debug, Clone)]
pub enum Body {
	Json(Value),
	Bytes(Vec<u8>),
	Text(String),
}

/// A materialized HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
	pub status: u16,
	pub headers: IndexMap<String, String>,
	pub body: Vec<u8>,
}

impl Response {
	/// Header lookup, case-insensitively, as the wire requires.
	pub fn header(&self, name: &str) -> Option<&str> {
		let lower = name.to_ascii_lowercase();
		self.headers.iter().find(|(k, _)| k.to_ascii_lowercase() == lower).map(|(_, v)| v.as_str())
	}

	/// Parses the body as JSON, by `Content-Type` (Functions-flavor rule).
	pub fn json(&self) -> Result<Value> {
		serde_json::from_slice(&self.body).map_err(Error::from)
	}

	/// Whether the server asked us to treat this as an error (relay sentinel).
	pub fn relay_error(&self) -> bool {
		self.header("x-relay-error") == Some("true")
	}
}

/// Caller-supplied request parameters.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
	/// Per-call headers, highest precedence.
	pub headers: IndexMap<String, String>,
	pub body: Option<Body>,
	pub timeout: Option<Duration>,
	/// Caller-supplied cancellation signal. When both `signal` and
	/// `timeout` are set, the request is raced against both and aborts on
	/// whichever fires first.
	pub signal: Option<CancellationToken>,
}

/// Shared HTTP client used by PostgREST, Storage, and Functions.
#[derive(Debug, Clone)]
pub struct HttpPlane {
	client: reqwest::Client,
}

impl HttpPlane {
	/// Builds a plane with the crate's default headers preconfigured.
	pub fn new() -> Result<Self> {
		let mut headers = HeaderMap::new();
		headers.insert(
			HeaderName::from_static("x-supabase-api-version"),
			HeaderValue::from_static(API_VERSION),
		);
		headers.insert(
			HeaderName::from_static("x-client-info"),
			HeaderValue::from_str(&format!("{SDK_NAME}/{SDK_VERSION}"))
				.map_err(|e| Error::new(error::ErrorKind::Internal, e.to_string()))?,
		);
		let client = reqwest::ClientBuilder::new().default_headers(headers).build()?;
		Ok(Self {
			client,
		})
	}

	/// Issues a request, merging auto-detected, client-default and per-call
	/// headers (low to high precedence) and applying a combined
	/// timeout/cancel source.
	///
	/// Never raises for a non-2xx response; callers run the result through
	/// [`error::classify_response`] themselves so the `{data, error}`
	/// contract is honored uniformly across services.
	pub async fn request(&self, method: Method, url: url::Url, auto_headers: IndexMap<String, String>, options: RequestOptions) -> Result<Response> {
		let mut merged: IndexMap<String, String> = IndexMap::new();
		for (key, value) in auto_headers {
			merged.insert(key, value);
		}
		for (key, value) in &options.headers {
			merged.insert(key.clone(), value.clone());
		}

		let mut builder = self.client.request(method.clone(), url);
		if let Some(body) = &options.body {
			match body {
				Body::Json(value) => {
					if !merged.contains_key("content-type") {
						merged.insert("content-type".to_string(), "application/json;charset=UTF-8".to_string());
					}
					builder = builder.json(value);
				}
				Body::Bytes(bytes) => {
					if !merged.contains_key("content-type") {
						merged.insert("content-type".to_string(), "application/octet-stream".to_string());
					}
					builder = builder.body(bytes.clone());
				}
				Body::Text(text) => {
					if !merged.contains_key("content-type") {
						merged.insert("content-type".to_string(), "text/plain".to_string());
					}
					builder = builder.body(text.clone());
				}
			}
		}

		let mut header_map = HeaderMap::new();
		for (key, value) in &merged {
			let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| Error::new(error::ErrorKind::Internal, e.to_string()))?;
			let value = HeaderValue::from_str(value).map_err(|e| Error::new(error::ErrorKind::Internal, e.to_string()))?;
			header_map.insert(name, value);
		}
		builder = builder.headers(header_map);

		let response = race_with_abort(builder.send(), options.timeout, options.signal.clone()).await?;
		let status = response.status().as_u16();
		let mut headers = IndexMap::new();
		for (name, value) in response.headers() {
			headers.insert(name.as_str().to_string(), value.to_str().unwrap_or_default().to_string());
		}
		let body = response.bytes().await?.to_vec();

		Ok(Response {
			status,
			headers,
			body,
		})
	}
}

/// Races a send future against an optional timeout and an optional caller
/// cancellation signal, deriving a single unified abort source that fires on
/// whichever happens first. Both the timeout error and the cancellation
/// error classify as `ErrorKind::Fetch`, matching the "AbortError surfaces
/// as FetchError" propagation rule.
async fn race_with_abort(send: impl std::future::Future<Output = reqwest::Result<reqwest::Response>>, timeout: Option<Duration>, signal: Option<CancellationToken>) -> Result<reqwest::Response> {
	match (timeout, signal) {
		(None, None) => Ok(send.await?),
		(Some(timeout), None) => match tokio::time::timeout(timeout, send).await {
			Ok(result) => Ok(result?),
			Err(_) => Err(Error::new(error::ErrorKind::Fetch, "request timed out")),
		},
		(None, Some(signal)) => {
			tokio::select! {
				result = send => Ok(result?),
				() = signal.cancelled() => Err(Error::new(error::ErrorKind::Fetch, "request aborted")),
			}
		}
		(Some(timeout), Some(signal)) => {
			tokio::select! {
				result = send => Ok(result?),
				_ = tokio::time::sleep(timeout) => Err(Error::new(error::ErrorKind::Fetch, "request timed out")),
				() = signal.cancelled() => Err(Error::new(error::ErrorKind::Fetch, "request aborted")),
			}
		}
	}
}

/// Resolves the bearer token to attach to outgoing requests. Implemented by
/// the Session Engine's `resolve()` glue.
#[async_trait::async_trait]
pub trait TokenResolver: Send + Sync {
	/// Returns the access token to send, or the anon key if there's no session.
	async fn resolve(&self) -> String;
}

/// Injects `Authorization`/`apikey` headers unless the caller already set
/// them — the auth-wrapping adapter used by PostgREST/Storage/Functions.
pub async fn with_auth_headers(resolver: &dyn TokenResolver, apikey: &str, mut headers: IndexMap<String, String>) -> IndexMap<String, String> {
	if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("authorization")) {
		headers.insert("Authorization".to_string(), format!("Bearer {}", resolver.resolve().await));
	}
	if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("apikey")) {
		headers.insert("apikey".to_string(), apikey.to_string());
	}
	headers
}

/// Merges PostgREST-style `Prefer` directives, comma-separated, avoiding
/// duplicate entries.
pub fn merge_prefer(existing: Option<&str>, addition: &str) -> String {
	match existing {
		Some(existing) if !existing.is_empty() => {
			let mut parts: Vec<&str> = existing.split(',').map(str::trim).collect();
			if !parts.contains(&addition) {
				parts.push(addition);
			}
			parts.join(",")
		}
		_ => addition.to_string(),
	}
}

/// Body content-type auto-detection rules used by the Functions flavor.
pub fn functions_content_type(body: &Body) -> &'static str {
	match body {
		Body::Bytes(_) => "application/octet-stream",
		Body::Text(_) => "text/plain",
		Body::Json(_) => "application/json",
	}
}

/// Response body auto-parse rule (Functions flavor), by `Content-Type`
/// (charset stripped).
pub enum ParsedBody {
	Json(Value),
	Bytes(Vec<u8>),
	Text(String),
}

/// Parses a response body by content type per the Functions-flavor table.
pub fn parse_functions_body(content_type: &str, body: &[u8]) -> ParsedBody {
	let stripped = content_type.split(';').next().unwrap_or(content_type).trim();
	match stripped {
		"application/json" => serde_json::from_slice(body).map(ParsedBody::Json).unwrap_or_else(|_| ParsedBody::Bytes(body.to_vec())),
		"application/octet-stream" | "application/pdf" => ParsedBody::Bytes(body.to_vec()),
		_ => ParsedBody::Text(String::from_utf8_lossy(body).into_owned()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn merges_prefer_directives_without_duplicates() {
		let merged = merge_prefer(Some("return=representation"), "count=exact");
		assert_eq!(merged, "return=representation,count=exact");
		let merged_again = merge_prefer(Some(&merged), "count=exact");
		assert_eq!(merged_again, merged);
	}

	#[test]
	fn functions_content_type_table() {
		assert_eq!(functions_content_type(&Body::Bytes(vec![])), "application/octet-stream");
		assert_eq!(functions_content_type(&Body::Text(String::new())), "text/plain");
		assert_eq!(functions_content_type(&Body::Json(Value::Null)), "application/json");
	}

	#[test]
	fn parses_json_body_by_content_type() {
		match parse_functions_body("application/json; charset=utf-8", br#"{"a":1}"#) {
			ParsedBody::Json(value) => assert_eq!(value["a"], 1),
			_ => panic!("expected JSON"),
		}
	}

	struct FixedResolver(String);

	#[async_trait::async_trait]
	impl TokenResolver for FixedResolver {
		async fn resolve(&self) -> String {
			self.0.clone()
		}
	}

	#[tokio::test]
	async fn auth_headers_are_not_overwritten() {
		let resolver = FixedResolver("token-a".to_string());
		let mut headers = IndexMap::new();
		headers.insert("Authorization".to_string(), "Bearer existing".to_string());
		let merged = with_auth_headers(&resolver, "anon-key", headers).await;
		assert_eq!(merged.get("Authorization").unwrap(), "Bearer existing");
		assert_eq!(merged.get("apikey").unwrap(), "anon-key");
	}

	#[tokio::test]
	async fn request_aborts_on_a_pre_cancelled_signal() {
		let server = wiremock::MockServer::start().await;
		wiremock::Mock::given(wiremock::matchers::method("GET"))
			.and(wiremock::matchers::path("/slow"))
			.respond_with(wiremock::ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
			.mount(&server)
			.await;

		let plane = HttpPlane::new().unwrap();
		let signal = CancellationToken::new();
		signal.cancel();
		let url = url::Url::parse(&format!("{}/slow", server.uri())).unwrap();
		let error = plane
			.request(Method::GET, url, IndexMap::new(), RequestOptions {
				headers: IndexMap::new(),
				body: None,
				timeout: None,
				signal: Some(signal),
			})
			.await
			.unwrap_err();
		assert!(matches!(error.kind(), error::ErrorKind::Fetch));
	}
}
