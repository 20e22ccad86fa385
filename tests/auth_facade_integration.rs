//! Exercises the PKCE recovery flow through the top-level façade rather
//! than directly against `AuthClient`, so the full `SupabaseClient::new`
//! wiring (URL construction, resolver, auto-refresh gating) is on the hook
//! too.

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use supabase_rs::{ClientOptions, SupabaseClient};

#[tokio::test]
async fn pkce_recovery_round_trips_through_the_facade() {
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

	let mut options = ClientOptions::default();
	options.auto_refresh_token = false;
	options.persist_session = false;
	let client = SupabaseClient::new(&server.uri(), "anon-key", options).unwrap();
	let auth = client.auth().expect("built-in session engine");

	auth.reset_password_for_email("user@example.test").await.unwrap();
	let session = auth.exchange_code_for_session("CODE").await.unwrap();
	assert_eq!(session.access_token, "A.B.C");

	let reloaded = auth.get_session().await.unwrap().unwrap();
	assert_eq!(reloaded.user["id"], "u1");
}

#[tokio::test]
async fn query_builder_round_trips_through_the_facade() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/rest/v1/todos"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "title": "write tests"}])))
		.mount(&server)
		.await;

	let mut options = ClientOptions::default();
	options.auto_refresh_token = false;
	options.persist_session = false;
	let client = SupabaseClient::new(&server.uri(), "anon-key", options).unwrap();

	let response = client.from("todos").unwrap().select("id,title", false, None).eq("done", "false").await.unwrap();
	assert_eq!(response.data[0]["title"], "write tests");
}
