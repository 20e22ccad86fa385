//! AuthClient facade: session persistence, refresh single-flight,
//! auto-refresh loop, event bus, PKCE storage.

pub mod events;
pub mod refresh;
pub mod session;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

use crate::error::{Error, ErrorKind, Result};
use crate::http::{Body, HttpPlane, RequestOptions};
use crate::lock::LockRegistry;
use crate::pkce;
use crate::storage::StorageAdapter;

use events::{AuthChangeEvent, EventBus, Subscription};
use refresh::{with_retry, RefreshCoordinator};
use session::Session;

const AUTO_REFRESH_TICK_DURATION_MS: i64 = 30_000;
const AUTO_REFRESH_TICK_THRESHOLD: i64 = 3;

/// Which OAuth flow to use for URL-based and PKCE-eligible operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
	Implicit,
	Pkce,
}

/// Sign-out scope: which sessions to revoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutScope {
	/// Revoke only other sessions server-side; keep the local one.
	Others,
	/// Remove the local session; revoke this session server-side.
	Local,
	/// Remove the local session; revoke every session server-side.
	Global,
}

fn now_s() -> i64 {
	std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn now_ms() -> i64 {
	std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

#[derive(serde::Deserialize)]
struct TokenResponse {
	access_token: String,
	refresh_token: String,
	expires_in: i64,
	expires_at: Option<i64>,
	#[serde(default)]
	user: Value,
}

/// The session/auth engine: persistence, refresh, PKCE, and event fan-out.
pub struct AuthClient {
	http: HttpPlane,
	base_url: Url,
	apikey: String,
	storage: Arc<dyn StorageAdapter>,
	storage_key: String,
	lock: Arc<LockRegistry>,
	session: AsyncMutex<Option<Session>>,
	events: EventBus,
	refresh_coordinator: RefreshCoordinator,
	flow_type: FlowType,
	auto_refresh_enabled: AtomicBool,
}

impl AuthClient {
	/// Builds an auth client rooted at `{base_url}` (already pointed at
	/// `/auth/v1`).
	pub fn new(http: HttpPlane, base_url: Url, apikey: String, storage: Arc<dyn StorageAdapter>, storage_key: String, lock: Arc<LockRegistry>, flow_type: FlowType) -> Self {
		Self {
			http,
			base_url,
			apikey,
			storage,
			storage_key,
			lock,
			session: AsyncMutex::new(None),
			events: EventBus::new(),
			refresh_coordinator: RefreshCoordinator::new(),
			flow_type,
			auto_refresh_enabled: AtomicBool::new(false),
		}
	}

	fn endpoint(&self, path: &str) -> Result<Url> {
		self.base_url.join(path).map_err(Error::from)
	}

	async fn post(&self, path: &str, body: Value) -> Result<Value> {
		let response = self
			.http
			.request(
				reqwest::Method::POST,
				self.endpoint(path)?,
				indexmap::IndexMap::new(),
				RequestOptions {
					headers: auth_headers(&self.apikey),
					body: Some(Body::Json(body)),
					timeout: None,
					signal: None,
				},
			)
			.await?;
		self.handle_response(response)
	}

	fn handle_response(&self, response: crate::http::Response) -> Result<Value> {
		if let Some(error) = crate::error::classify_response(response.status, &response.body, response.header("x-relay-error")) {
			return Err(error);
		}
		if response.body.is_empty() {
			return Ok(Value::Null);
		}
		response.json()
	}

	async fn persist(&self, session: &Session) -> Result<()> {
		let encoded = serde_json::to_string(session)?;
		self.storage.set_item(&self.storage_key, encoded).await;
		Ok(())
	}

	async fn forget(&self) {
		self.storage.remove_item(&self.storage_key).await;
	}

	fn session_from_token_response(response: TokenResponse) -> Session {
		Session::new(response.access_token, response.refresh_token, response.expires_in, response.expires_at, response.user, now_s())
	}

	/// `POST /token?grant_type=password`.
	pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
		let body = self.post("token?grant_type=password", json!({"email": email, "password": password})).await?;
		let response: TokenResponse = serde_json::from_value(body)?;
		let session = Self::session_from_token_response(response);
		self.lock
			.with_lock("session", 10_000, || async {
				*self.session.lock().await = Some(session.clone());
				self.persist(&session).await?;
				self.events.emit(AuthChangeEvent::SignedIn, Some(session.clone())).await;
				Ok::<_, Error>(session.clone())
			})
			.await?
	}

	/// `POST /signup`.
	pub async fn sign_up(&self, email: &str, password: &str) -> Result<Session> {
		let body = self.post("signup", json!({"email": email, "password": password})).await?;
		let response: TokenResponse = serde_json::from_value(body)?;
		let session = Self::session_from_token_response(response);
		self.lock
			.with_lock("session", 10_000, || async {
				*self.session.lock().await = Some(session.clone());
				self.persist(&session).await?;
				self.events.emit(AuthChangeEvent::SignedIn, Some(session.clone())).await;
				Ok::<_, Error>(session.clone())
			})
			.await?
	}

	/// Loads the session, refreshing it first if it's within the expiry
	/// margin. Removes the local session on a non-retryable refresh
	/// failure.
	///
	/// Does not hold the named lock around the refresh itself: `do_refresh`
	/// single-flights concurrent refreshes on its own, and wrapping that
	/// round-trip in the named lock too would serialize callers at a
	/// coarser grain than the single-flight dedup already provides.
	pub async fn get_session(&self) -> Result<Option<Session>> {
		let current = self.load_or_get().await?;
		let Some(session) = current else {
			return Ok(None);
		};
		if session.is_expired(now_ms()) {
			match self.do_refresh(Some(session.refresh_token.clone())).await {
				Ok(refreshed) => Ok(Some(refreshed)),
				Err(error) => {
					if !error.is_retryable() {
						*self.session.lock().await = None;
						self.forget().await;
					}
					Err(error)
				}
			}
		} else {
			Ok(Some(session))
		}
	}

	async fn load_or_get(&self) -> Result<Option<Session>> {
		let mut guard = self.session.lock().await;
		if guard.is_none() {
			if let Some(raw) = self.storage.get_item(&self.storage_key).await {
				if let Ok(session) = serde_json::from_str::<Session>(&raw) {
					*guard = Some(session);
				}
			}
		}
		Ok(guard.clone())
	}

	/// `GET /user` — always hits the server, never returns a cached value.
	pub async fn get_user(&self, access_token: Option<&str>) -> Result<Value> {
		let token = match access_token {
			Some(token) => token.to_string(),
			None => {
				let session = self.get_session().await?.ok_or_else(Error::session_missing)?;
				session.access_token
			}
		};
		let mut headers = auth_headers(&self.apikey);
		headers.insert("Authorization".to_string(), format!("Bearer {token}"));
		let response = self.http.request(reqwest::Method::GET, self.endpoint("user")?, indexmap::IndexMap::new(), RequestOptions {
			headers,
			body: None,
			timeout: None,
			signal: None,
		}).await?;
		self.handle_response(response)
	}

	/// Builds a session directly from a pair of tokens, without contacting
	/// the server unless the access token is already expired.
	pub async fn set_session(&self, access_token: String, refresh_token: String) -> Result<Session> {
		let claims = crate::jwt::decode_claims(&access_token).ok_or_else(|| Error::new(ErrorKind::InvalidTokenResponse, "malformed access token"))?;
		let exp = claims.get("exp").and_then(Value::as_i64).unwrap_or(0);
		if exp * 1000 <= now_ms() {
			return self.do_refresh(Some(refresh_token)).await;
		}
		let user = claims.get("user").cloned().unwrap_or(Value::Null);
		let session = Session::from_claims(access_token, refresh_token, user)?;
		self.lock
			.with_lock("session", 10_000, || async {
				*self.session.lock().await = Some(session.clone());
				self.persist(&session).await?;
				self.events.emit(AuthChangeEvent::SignedIn, Some(session.clone())).await;
				self.events.emit(AuthChangeEvent::TokenRefreshed, Some(session.clone())).await;
				Ok(session)
			})
			.await?
	}

	/// Refreshes the current (or an explicitly provided) refresh token,
	/// single-flighted, with exponential-backoff retry on transport
	/// failures.
	pub async fn refresh_session(&self, provided: Option<String>) -> Result<Session> {
		self.do_refresh(provided).await
	}

	/// Performs (or attaches to an in-flight) token refresh, then applies
	/// the result.
	///
	/// The outbound HTTP round-trip goes through `refresh_coordinator`,
	/// which already deduplicates concurrent callers into one request; it
	/// intentionally runs outside the named lock. Only the short
	/// state-mutation tail below takes `self.lock`, and only long enough to
	/// apply one outcome — holding the lock around the network call too
	/// would force a second concurrent caller to wait for the first to
	/// fully finish before even reaching the single-flight future it was
	/// meant to share.
	async fn do_refresh(&self, provided: Option<String>) -> Result<Session> {
		let refresh_token = match provided {
			Some(token) => token,
			None => self.session.lock().await.as_ref().map(|s| s.refresh_token.clone()).ok_or_else(Error::session_missing)?,
		};
		let http = self.http.clone();
		let endpoint = self.endpoint("token?grant_type=refresh_token")?;
		let apikey = self.apikey.clone();
		let result = self
			.refresh_coordinator
			.refresh(move || {
				Box::pin(async move {
					with_retry(|| {
						let http = http.clone();
						let endpoint = endpoint.clone();
						let apikey = apikey.clone();
						let refresh_token = refresh_token.clone();
						async move {
							let response = http
								.request(
									reqwest::Method::POST,
									endpoint,
									indexmap::IndexMap::new(),
									RequestOptions {
										headers: auth_headers(&apikey),
										body: Some(Body::Json(json!({"refresh_token": refresh_token}))),
										timeout: None,
										signal: None,
									},
								)
								.await?;
							if let Some(error) = crate::error::classify_response(response.status, &response.body, response.header("x-relay-error")) {
								return Err(error);
							}
							let parsed: TokenResponse = serde_json::from_slice(&response.body)?;
							Ok(AuthClient::session_from_token_response(parsed))
						}
					})
					.await
				})
			})
			.await;

		self.lock
			.with_lock("session", 10_000, || async {
				match &result {
					Ok(session) => {
						// Two callers sharing one single-flighted result both
						// reach here; only the first should persist and emit.
						let already_applied = self.session.lock().await.as_ref().map(|current| current.access_token == session.access_token).unwrap_or(false);
						*self.session.lock().await = Some(session.clone());
						if !already_applied {
							self.persist(session).await?;
							self.events.emit(AuthChangeEvent::TokenRefreshed, Some(session.clone())).await;
						}
					}
					Err(error) if !error.is_retryable() => {
						*self.session.lock().await = None;
						self.forget().await;
					}
					Err(_) => {}
				}
				Ok::<_, Error>(())
			})
			.await??;
		result
	}

	/// Signs out. `others` leaves the local session untouched; `local`
	/// and `global` remove it and emit `SIGNED_OUT` regardless of the
	/// server call's outcome.
	pub async fn sign_out(&self, scope: SignOutScope) -> Result<()> {
		self.lock
			.with_lock("session", 10_000, || async {
				if scope != SignOutScope::Others {
					if let Some(session) = self.session.lock().await.clone() {
						let mut headers = auth_headers(&self.apikey);
						headers.insert("Authorization".to_string(), format!("Bearer {}", session.access_token));
						let _ = self
							.http
							.request(
								reqwest::Method::POST,
								self.endpoint("logout")?,
								indexmap::IndexMap::new(),
								RequestOptions {
									headers,
									body: None,
									timeout: None,
									signal: None,
								},
							)
							.await;
					}
					*self.session.lock().await = None;
					self.forget().await;
					self.stop_auto_refresh();
					self.events.emit(AuthChangeEvent::SignedOut, None).await;
				} else if let Some(session) = self.session.lock().await.clone() {
					let mut headers = auth_headers(&self.apikey);
					headers.insert("Authorization".to_string(), format!("Bearer {}", session.access_token));
					let _ = self
						.http
						.request(
							reqwest::Method::POST,
							self.endpoint("logout?scope=others")?,
							indexmap::IndexMap::new(),
							RequestOptions {
								headers,
								body: None,
								timeout: None,
								signal: None,
							},
						)
						.await;
				}
				Ok::<_, Error>(())
			})
			.await?
	}

	/// Registers a listener. `INITIAL_SESSION` is delivered once,
	/// asynchronously, with the current session.
	pub async fn on_auth_state_change<F>(&self, callback: F) -> Subscription
	where
		F: Fn(AuthChangeEvent, Option<Session>) + Send + Sync + 'static,
	{
		let current = self.session.lock().await.clone();
		self.events.subscribe(callback, current).await
	}

	/// Starts the periodic auto-refresh loop (idempotent: calling it again
	/// while already running is a no-op).
	pub fn start_auto_refresh(self: &Arc<Self>) {
		if self.auto_refresh_enabled.swap(true, Ordering::SeqCst) {
			return;
		}
		let this = self.clone();
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(Duration::from_millis(AUTO_REFRESH_TICK_DURATION_MS as u64));
			loop {
				interval.tick().await;
				if !this.auto_refresh_enabled.load(Ordering::SeqCst) {
					break;
				}
				this.auto_refresh_tick().await;
			}
		});
	}

	/// Stops the auto-refresh loop.
	pub fn stop_auto_refresh(&self) {
		self.auto_refresh_enabled.store(false, Ordering::SeqCst);
	}

	async fn auto_refresh_tick(&self) {
		let session = self.session.lock().await.clone();
		let Some(session) = session else {
			return;
		};
		if session.ticks_until_expiry(now_ms(), AUTO_REFRESH_TICK_DURATION_MS) <= AUTO_REFRESH_TICK_THRESHOLD {
			if let Err(error) = self.do_refresh(Some(session.refresh_token)).await {
				tracing::warn!(%error, "auto-refresh tick failed");
			}
		}
	}

	/// Starts a PKCE flow: generates a verifier, stores it (password
	/// recovery suffixes `/PASSWORD_RECOVERY`), and returns the S256
	/// challenge to attach to the outbound request.
	async fn start_pkce(&self, password_recovery: bool) -> Option<String> {
		if self.flow_type != FlowType::Pkce {
			return None;
		}
		let verifier = pkce::generate_verifier();
		let challenge = pkce::challenge_s256(&verifier);
		let stored = if password_recovery {
			format!("{verifier}/PASSWORD_RECOVERY")
		} else {
			verifier
		};
		self.storage.set_item(&format!("{}-code-verifier", self.storage_key), stored).await;
		Some(challenge)
	}

	/// `POST /recover`, storing a PKCE verifier when `flow_type == pkce`.
	pub async fn reset_password_for_email(&self, email: &str) -> Result<()> {
		let challenge = self.start_pkce(true).await;
		let mut body = json!({"email": email});
		if let Some(challenge) = challenge {
			body["code_challenge"] = json!(challenge);
			body["code_challenge_method"] = json!(pkce::METHOD_S256);
		}
		self.post("recover", body).await?;
		Ok(())
	}

	/// Consumes the stored PKCE verifier and exchanges `code` for a
	/// session. Emits `PASSWORD_RECOVERY` instead of `SIGNED_IN` when the
	/// verifier carries the password-recovery suffix.
	pub async fn exchange_code_for_session(&self, code: &str) -> Result<Session> {
		let key = format!("{}-code-verifier", self.storage_key);
		let stored = self.storage.get_item(&key).await.ok_or_else(Error::pkce_grant_code_exchange)?;
		self.storage.remove_item(&key).await;
		let (verifier, is_recovery) = match stored.strip_suffix("/PASSWORD_RECOVERY") {
			Some(verifier) => (verifier.to_string(), true),
			None => (stored, false),
		};

		let body = self.post("token?grant_type=pkce", json!({"auth_code": code, "code_verifier": verifier})).await?;
		let response: TokenResponse = serde_json::from_value(body)?;
		let session = Self::session_from_token_response(response);

		self.lock
			.with_lock("session", 10_000, || async {
				*self.session.lock().await = Some(session.clone());
				self.persist(&session).await?;
				let event = if is_recovery {
					AuthChangeEvent::PasswordRecovery
				} else {
					AuthChangeEvent::SignedIn
				};
				self.events.emit(event, Some(session.clone())).await;
				Ok::<_, Error>(session.clone())
			})
			.await?
	}

	// --- thin, mechanical endpoint mappers ---

	/// `PUT /user`.
	pub async fn update_user(&self, attributes: Value) -> Result<Value> {
		let session = self.get_session().await?.ok_or_else(Error::session_missing)?;
		let mut headers = auth_headers(&self.apikey);
		headers.insert("Authorization".to_string(), format!("Bearer {}", session.access_token));
		let response = self
			.http
			.request(
				reqwest::Method::PUT,
				self.endpoint("user")?,
				indexmap::IndexMap::new(),
				RequestOptions {
					headers,
					body: Some(Body::Json(attributes)),
					timeout: None,
					signal: None,
				},
			)
			.await?;
		self.handle_response(response)
	}

	/// `POST /otp`.
	pub async fn sign_in_with_otp(&self, email: &str) -> Result<()> {
		let challenge = self.start_pkce(false).await;
		let mut body = json!({"email": email});
		if let Some(challenge) = challenge {
			body["code_challenge"] = json!(challenge);
			body["code_challenge_method"] = json!(pkce::METHOD_S256);
		}
		self.post("otp", body).await?;
		Ok(())
	}

	/// `POST /verify`.
	pub async fn verify_otp(&self, email: &str, token: &str, otp_type: &str) -> Result<Session> {
		let body = self.post("verify", json!({"email": email, "token": token, "type": otp_type})).await?;
		let response: TokenResponse = serde_json::from_value(body)?;
		Ok(Self::session_from_token_response(response))
	}

	/// `POST /factors`.
	pub async fn mfa_enroll(&self, factor_type: &str) -> Result<Value> {
		self.post("factors", json!({"factor_type": factor_type})).await
	}

	/// `POST /factors/{id}/challenge`.
	pub async fn mfa_challenge(&self, factor_id: &str) -> Result<Value> {
		self.post(&format!("factors/{factor_id}/challenge"), json!({})).await
	}

	/// `POST /factors/{id}/verify`.
	pub async fn mfa_verify(&self, factor_id: &str, challenge_id: &str, code: &str) -> Result<Value> {
		self.post(&format!("factors/{factor_id}/verify"), json!({"challenge_id": challenge_id, "code": code})).await
	}

	/// `GET /admin/users` — requires a service-role key as `apikey`.
	pub async fn admin_list_users(&self) -> Result<Value> {
		let response = self
			.http
			.request(reqwest::Method::GET, self.endpoint("admin/users")?, indexmap::IndexMap::new(), RequestOptions {
				headers: auth_headers(&self.apikey),
				body: None,
				timeout: None,
				signal: None,
			})
			.await?;
		self.handle_response(response)
	}

	/// `POST /admin/users`.
	pub async fn admin_create_user(&self, attributes: Value) -> Result<Value> {
		self.post("admin/users", attributes).await
	}
}

fn auth_headers(apikey: &str) -> indexmap::IndexMap<String, String> {
	let mut headers = indexmap::IndexMap::new();
	headers.insert("apikey".to_string(), apikey.to_string());
	headers.insert("Content-Type".to_string(), "application/json;charset=UTF-8".to_string());
	headers
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::MemoryStorage;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	async fn test_client(server: &MockServer) -> Arc<AuthClient> {
		let http = HttpPlane::new().unwrap();
		let base_url = Url::parse(&format!("{}/auth/v1/", server.uri())).unwrap();
		Arc::new(AuthClient::new(
			http,
			base_url,
			"anon-key".to_string(),
			Arc::new(MemoryStorage::new()),
			"sb-test-auth-token".to_string(),
			Arc::new(LockRegistry::new()),
			FlowType::Implicit,
		))
	}

	#[tokio::test]
	async fn sign_in_with_password_emits_signed_in_and_persists() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/auth/v1/token"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"access_token": "A.B.C",
				"refresh_token": "R",
				"expires_in": 3600,
				"user": {"id": "u1"},
			})))
			.mount(&server)
			.await;

		let client = test_client(&server).await;
		let session = client.sign_in_with_password("u@x", "p").await.unwrap();
		assert_eq!(session.user["id"], "u1");

		let reloaded = client.get_session().await.unwrap().unwrap();
		assert_eq!(reloaded.access_token, "A.B.C");
	}

	#[tokio::test]
	async fn sign_up_surfaces_weak_password_error_without_persisting() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/auth/v1/signup"))
			.respond_with(ResponseTemplate::new(422).set_body_json(json!({
				"error_code": "weak_password",
				"msg": "too short",
				"weak_password": {"reasons": ["length"]},
			})))
			.mount(&server)
			.await;

		let client = test_client(&server).await;
		let error = client.sign_up("u@x", "p").await.unwrap_err();
		assert!(matches!(error.kind(), ErrorKind::WeakPassword { reasons } if reasons == &vec!["length".to_string()]));
		assert!(client.get_session().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn pkce_recovery_flow_emits_password_recovery() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/auth/v1/recover"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.and(path("/auth/v1/token"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"access_token": "A.B.C",
				"refresh_token": "R",
				"expires_in": 3600,
				"user": {"id": "u1"},
			})))
			.mount(&server)
			.await;

		let http = HttpPlane::new().unwrap();
		let base_url = Url::parse(&format!("{}/auth/v1/", server.uri())).unwrap();
		let client = Arc::new(AuthClient::new(
			http,
			base_url,
			"anon-key".to_string(),
			Arc::new(MemoryStorage::new()),
			"sb-test-auth-token".to_string(),
			Arc::new(LockRegistry::new()),
			FlowType::Pkce,
		));

		client.reset_password_for_email("u@x").await.unwrap();
		let events = Arc::new(AsyncMutex::new(Vec::new()));
		let events_clone = events.clone();
		client.on_auth_state_change(move |event, _| {
			let events = events_clone.clone();
			tokio::spawn(async move { events.lock().await.push(event); });
		}).await;

		let session = client.exchange_code_for_session("CODE").await.unwrap();
		assert_eq!(session.access_token, "A.B.C");
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(events.lock().await.contains(&AuthChangeEvent::PasswordRecovery));
	}
}
