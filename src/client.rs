//! SupabaseClient façade and token-plane glue.
//!
//! Wires the Session Engine's `resolve()` into the HTTP Plane as a
//! [`TokenResolver`] closure; the same resolver additionally feeds
//! [`realtime::RealtimeClient::set_auth`] so the realtime socket's auth
//! plane tracks the session without a second source of truth.

use std::sync::Arc;

use serde_json::Value;
use url::Url;

use crate::auth::{events::AuthChangeEvent, AuthClient, FlowType};
use crate::error::{Error, ErrorKind, Result};
use crate::http::{self, Body, HttpPlane, RequestOptions, TokenResolver};
use crate::lock::LockRegistry;
use crate::postgrest::QueryBuilder;
use crate::realtime::RealtimeClient;
use crate::storage::{MemoryStorage, StorageAdapter};

const DEFAULT_STORAGE_KEY: &str = "sb-auth-token";

/// Realtime transport tuning: heartbeat cadence and push-ack timeout.
#[derive(Debug, Clone)]
pub struct RealtimeOptions {
	pub heartbeat_interval_ms: u64,
	pub timeout_ms: u64,
	/// Extra query parameters appended to the websocket endpoint URL.
	pub params: Vec<(String, String)>,
}

impl Default for RealtimeOptions {
	fn default() -> Self {
		Self {
			heartbeat_interval_ms: 25_000,
			timeout_ms: 10_000,
			params: Vec::new(),
		}
	}
}

/// Top-level client configuration.
pub struct ClientOptions {
	pub auto_refresh_token: bool,
	pub persist_session: bool,
	pub detect_session_in_url: bool,
	pub flow_type: FlowType,
	pub storage_key: String,
	pub storage: Option<Arc<dyn StorageAdapter>>,
	pub schema: String,
	pub realtime: RealtimeOptions,
}

impl Default for ClientOptions {
	fn default() -> Self {
		Self {
			auto_refresh_token: true,
			persist_session: true,
			detect_session_in_url: true,
			flow_type: FlowType::Pkce,
			storage_key: DEFAULT_STORAGE_KEY.to_string(),
			storage: None,
			schema: "public".to_string(),
			realtime: RealtimeOptions::default(),
		}
	}
}

impl std::fmt::Debug for ClientOptions {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClientOptions")
			.field("auto_refresh_token", &self.auto_refresh_token)
			.field("persist_session", &self.persist_session)
			.field("detect_session_in_url", &self.detect_session_in_url)
			.field("flow_type", &self.flow_type)
			.field("storage_key", &self.storage_key)
			.field("schema", &self.schema)
			.field("realtime", &self.realtime)
			.finish()
	}
}

/// Resolves outgoing bearer tokens from the built-in Session Engine,
/// refreshing first when the cached session is within its expiry margin.
struct SessionResolver {
	auth: Arc<AuthClient>,
	apikey: String,
}

#[async_trait::async_trait]
impl TokenResolver for SessionResolver {
	async fn resolve(&self) -> String {
		match self.auth.get_session().await {
			Ok(Some(session)) => session.access_token,
			_ => self.apikey.clone(),
		}
	}
}

/// Either the built-in Session Engine, or a caller-supplied resolver for
/// third-party auth (a non-Supabase JWT issuer fronting PostgREST/Realtime).
enum AuthMode {
	Managed(Arc<AuthClient>),
	ThirdParty(Arc<dyn TokenResolver>),
}

/// Thin wrapper over the auth-wrapped HTTP Plane for Edge Functions
/// invocation, with no function-specific business logic.
pub struct FunctionsClient {
	http: HttpPlane,
	base_url: Url,
	resolver: Arc<dyn TokenResolver>,
	apikey: String,
}

impl FunctionsClient {
	/// Invokes `{base_url}/{name}`, auto-detecting the request content type
	/// from `body` and parsing the response the same way.
	pub async fn invoke(&self, name: &str, body: Body, extra_headers: indexmap::IndexMap<String, String>) -> Result<http::ParsedBody> {
		let url = self.base_url.join(name).map_err(Error::from)?;
		let mut headers = http::with_auth_headers(self.resolver.as_ref(), &self.apikey, extra_headers).await;
		if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
			headers.insert("Content-Type".to_string(), http::functions_content_type(&body).to_string());
		}
		let response = self
			.http
			.request(
				reqwest::Method::POST,
				url,
				indexmap::IndexMap::new(),
				RequestOptions {
					headers,
					body: Some(body),
					timeout: None,
					signal: None,
				},
			)
			.await?;
		if let Some(error) = crate::error::classify_response(response.status, &response.body, response.header("x-relay-error")) {
			return Err(error);
		}
		let content_type = response.header("content-type").unwrap_or("text/plain").to_string();
		Ok(http::parse_functions_body(&content_type, &response.body))
	}
}

/// Thin wrapper over the Storage (object storage) REST surface, with no
/// bucket/file-specific business logic.
pub struct StorageClient {
	http: HttpPlane,
	base_url: Url,
	resolver: Arc<dyn TokenResolver>,
	apikey: String,
}

impl StorageClient {
	/// Scopes subsequent calls to one bucket.
	pub fn from_bucket(&self, bucket: &str) -> StorageFileApi {
		StorageFileApi {
			http: self.http.clone(),
			base_url: self.base_url.clone(),
			resolver: self.resolver.clone(),
			apikey: self.apikey.clone(),
			bucket: bucket.to_string(),
		}
	}
}

/// Per-bucket object operations.
pub struct StorageFileApi {
	http: HttpPlane,
	base_url: Url,
	resolver: Arc<dyn TokenResolver>,
	apikey: String,
	bucket: String,
}

impl StorageFileApi {
	/// `POST /object/{bucket}/{path}`.
	pub async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<Value> {
		let url = self.base_url.join(&format!("object/{}/{path}", self.bucket)).map_err(Error::from)?;
		let mut headers = http::with_auth_headers(self.resolver.as_ref(), &self.apikey, indexmap::IndexMap::new()).await;
		headers.insert("Content-Type".to_string(), content_type.to_string());
		let response = self
			.http
			.request(
				reqwest::Method::POST,
				url,
				indexmap::IndexMap::new(),
				RequestOptions {
					headers,
					body: Some(Body::Bytes(bytes)),
					timeout: None,
					signal: None,
				},
			)
			.await?;
		if let Some(error) = crate::error::classify_response(response.status, &response.body, response.header("x-relay-error")) {
			return Err(error);
		}
		response.json()
	}

	/// `DELETE /object/{bucket}/{path}`.
	pub async fn remove(&self, path: &str) -> Result<Value> {
		let url = self.base_url.join(&format!("object/{}/{path}", self.bucket)).map_err(Error::from)?;
		let headers = http::with_auth_headers(self.resolver.as_ref(), &self.apikey, indexmap::IndexMap::new()).await;
		let response = self
			.http
			.request(
				reqwest::Method::DELETE,
				url,
				indexmap::IndexMap::new(),
				RequestOptions {
					headers,
					body: None,
					timeout: None,
					signal: None,
				},
			)
			.await?;
		if let Some(error) = crate::error::classify_response(response.status, &response.body, response.header("x-relay-error")) {
			return Err(error);
		}
		response.json()
	}
}

/// The client-side runtime entry point: PostgREST query builder, the
/// session/auth engine, the realtime transport, and thin Functions/Storage
/// wrappers, all sharing one [`HttpPlane`].
pub struct SupabaseClient {
	http: HttpPlane,
	rest_url: Url,
	apikey: String,
	auth_mode: AuthMode,
	resolver: Arc<dyn TokenResolver>,
	realtime: Arc<RealtimeClient>,
	functions: FunctionsClient,
	storage: StorageClient,
	schema: String,
}

impl SupabaseClient {
	/// Builds a client rooted at `project_url` (e.g.
	/// `https://abcd.supabase.co`), wiring `/rest/v1`, `/auth/v1`,
	/// `/realtime/v1`, `/functions/v1`, and `/storage/v1` off of it.
	pub fn new(project_url: &str, apikey: &str, options: ClientOptions) -> Result<Self> {
		let base = Url::parse(project_url).map_err(Error::from)?;
		let http = HttpPlane::new()?;

		let rest_url = base.join("rest/v1/").map_err(Error::from)?;
		let auth_url = base.join("auth/v1/").map_err(Error::from)?;
		let functions_url = base.join("functions/v1/").map_err(Error::from)?;
		let storage_url = base.join("storage/v1/").map_err(Error::from)?;
		let realtime_url = realtime_websocket_url(&base, apikey, &options.realtime)?;

		let storage_adapter = options.storage.clone().unwrap_or_else(|| Arc::new(MemoryStorage::new()));
		let lock = Arc::new(LockRegistry::new());
		let auth = Arc::new(AuthClient::new(
			http.clone(),
			auth_url,
			apikey.to_string(),
			storage_adapter,
			options.storage_key.clone(),
			lock,
			options.flow_type,
		));

		if options.persist_session && options.auto_refresh_token {
			auth.start_auto_refresh();
		}

		let auth_mode = AuthMode::Managed(auth.clone());
		let resolver: Arc<dyn TokenResolver> = Arc::new(SessionResolver {
			auth: auth.clone(),
			apikey: apikey.to_string(),
		});

		let realtime = Arc::new(RealtimeClient::with_timing(realtime_url, options.realtime.heartbeat_interval_ms, options.realtime.timeout_ms));
		let realtime_for_events = realtime.clone();
		let auth_for_events = auth.clone();
		let last_sent_token: Arc<std::sync::Mutex<Option<String>>> = Arc::new(std::sync::Mutex::new(None));
		tokio::spawn(async move {
			auth_for_events
				.on_auth_state_change(move |event, session| {
					// Only a signed-in/refreshed session carries a token the
					// realtime socket should authenticate with; every other
					// event (signed-out, password-recovery, user-updated,
					// ...) leaves the current realtime auth alone.
					let token = match event {
						AuthChangeEvent::SignedIn | AuthChangeEvent::TokenRefreshed => session.map(|s| s.access_token),
						_ => return,
					};
					let mut last_sent = last_sent_token.lock().unwrap();
					if *last_sent == token {
						return;
					}
					*last_sent = token.clone();
					realtime_for_events.set_auth(token);
				})
				.await;
		});

		let functions = FunctionsClient {
			http: http.clone(),
			base_url: functions_url,
			resolver: resolver.clone(),
			apikey: apikey.to_string(),
		};
		let storage = StorageClient {
			http: http.clone(),
			base_url: storage_url,
			resolver,
			apikey: apikey.to_string(),
		};

		Ok(Self {
			http,
			rest_url,
			apikey: apikey.to_string(),
			auth_mode,
			resolver,
			realtime,
			functions,
			storage,
			schema: options.schema,
		})
	}

	/// Builds a client that bypasses the built-in Session Engine entirely,
	/// resolving bearer tokens from a caller-supplied third-party issuer
	/// (e.g. Clerk, Auth0) instead of Supabase Auth.
	pub fn with_third_party_auth(project_url: &str, apikey: &str, resolver: Arc<dyn TokenResolver>, options: ClientOptions) -> Result<Self> {
		let base = Url::parse(project_url).map_err(Error::from)?;
		let http = HttpPlane::new()?;
		let rest_url = base.join("rest/v1/").map_err(Error::from)?;
		let functions_url = base.join("functions/v1/").map_err(Error::from)?;
		let storage_url = base.join("storage/v1/").map_err(Error::from)?;
		let realtime_url = realtime_websocket_url(&base, apikey, &options.realtime)?;

		let functions = FunctionsClient {
			http: http.clone(),
			base_url: functions_url,
			resolver: resolver.clone(),
			apikey: apikey.to_string(),
		};
		let storage = StorageClient {
			http: http.clone(),
			base_url: storage_url,
			resolver: resolver.clone(),
			apikey: apikey.to_string(),
		};

		Ok(Self {
			http,
			rest_url,
			apikey: apikey.to_string(),
			auth_mode: AuthMode::ThirdParty(resolver.clone()),
			resolver,
			realtime: Arc::new(RealtimeClient::with_timing(realtime_url, options.realtime.heartbeat_interval_ms, options.realtime.timeout_ms)),
			functions,
			storage,
			schema: options.schema,
		})
	}

	/// Starts a PostgREST builder chain against `relation`, under the
	/// client's configured schema.
	pub fn from(&self, relation: &str) -> Result<QueryBuilder> {
		let builder = QueryBuilder::new(self.http.clone(), self.rest_url.clone(), self.resolver.clone(), self.apikey.clone(), relation)?;
		Ok(builder.schema(&self.schema))
	}

	/// The built-in Session Engine, or `None` under third-party auth.
	pub fn auth(&self) -> Option<&Arc<AuthClient>> {
		match &self.auth_mode {
			AuthMode::Managed(auth) => Some(auth),
			AuthMode::ThirdParty(_) => None,
		}
	}

	/// The realtime transport handle.
	pub fn realtime(&self) -> &Arc<RealtimeClient> {
		&self.realtime
	}

	/// Edge Functions invocation.
	pub fn functions(&self) -> &FunctionsClient {
		&self.functions
	}

	/// Object storage.
	pub fn storage(&self) -> &StorageClient {
		&self.storage
	}

	/// Cross-tab session synchronization is a browser `BroadcastChannel`
	/// feature; there's no analogue off-wasm, so this is a documented no-op
	/// rather than a silently missing capability.
	pub fn enable_cross_tab_sync(&self) {
		tracing::debug!("cross-tab session sync has no effect on native targets");
	}
}

fn realtime_websocket_url(base: &Url, apikey: &str, options: &RealtimeOptions) -> Result<Url> {
	let mut url = base.join("realtime/v1/websocket").map_err(Error::from)?;
	match url.scheme() {
		"https" => url.set_scheme("wss").map_err(|_| Error::new(ErrorKind::Internal, "failed to rewrite scheme"))?,
		"http" => url.set_scheme("ws").map_err(|_| Error::new(ErrorKind::Internal, "failed to rewrite scheme"))?,
		_ => {}
	}
	{
		let mut pairs = url.query_pairs_mut();
		pairs.append_pair("vsn", "2.0.0");
		pairs.append_pair("apikey", apikey);
		for (key, value) in &options.params {
			pairs.append_pair(key, value);
		}
	}
	Ok(url)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rewrites_scheme_and_appends_vsn_and_apikey() {
		let base = Url::parse("https://abcd.supabase.co").unwrap();
		let url = realtime_websocket_url(&base, "anon-key", &RealtimeOptions::default()).unwrap();
		assert_eq!(url.scheme(), "wss");
		assert!(url.as_str().contains("vsn=2.0.0"));
		assert!(url.as_str().contains("apikey=anon-key"));
	}

	#[tokio::test]
	async fn client_builds_with_default_options() {
		let client = SupabaseClient::new("https://abcd.supabase.co", "anon-key", ClientOptions::default()).unwrap();
		assert!(client.auth().is_some());
		assert!(client.from("todos").is_ok());
	}
}
