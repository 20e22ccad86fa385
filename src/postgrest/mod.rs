//! Query Builder entry points: lazy CRUD/filter/transform composition,
//! URL/header accumulation.
//!
//! Each CRUD call clones the inherited URL and headers before handing off
//! to a [`filter::FilterBuilder`], so sibling operations built from one
//! `from(relation)` call have disjoint mutable state — a "builder returns a
//! narrower builder" chain, one struct per PostgREST builder stage.

pub mod filter;
pub mod transform;

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use url::Url;

use crate::error::{Error, ErrorKind, Result};
use crate::http::{Body, HttpPlane, RequestOptions, TokenResolver};

pub use filter::FilterBuilder;
pub use transform::TransformBuilder;

/// Shared, immutable context every builder clones a reference to.
pub(crate) struct PostgrestContext {
	pub http: HttpPlane,
	pub base_url: Url,
	pub resolver: Arc<dyn TokenResolver>,
	pub apikey: String,
}

/// The accumulated, mutable state of a builder chain.
#[derive(Clone)]
pub(crate) struct Builder {
	pub(crate) ctx: Arc<PostgrestContext>,
	pub(crate) method: reqwest::Method,
	pub(crate) url: Url,
	pub(crate) headers: IndexMap<String, String>,
	pub(crate) body: Option<Value>,
	pub(crate) is_maybe_single: bool,
}

/// A successful response's shape: decoded body plus optional exact count.
#[derive(Debug, Clone)]
pub struct QueryResponse {
	pub data: Value,
	pub count: Option<i64>,
	pub status: u16,
}

/// Entry point returned by `client.from(relation)`.
pub struct QueryBuilder {
	ctx: Arc<PostgrestContext>,
	url: Url,
	headers: IndexMap<String, String>,
}

impl QueryBuilder {
	pub(crate) fn new(http: HttpPlane, base_url: Url, resolver: Arc<dyn TokenResolver>, apikey: String, relation: &str) -> Result<Self> {
		let mut url = base_url.clone();
		url.path_segments_mut().map_err(|_| Error::new(ErrorKind::Internal, "base url cannot be a base"))?.push(relation);
		Ok(Self {
			ctx: Arc::new(PostgrestContext {
				http,
				base_url,
				resolver,
				apikey,
			}),
			url,
			headers: IndexMap::new(),
		})
	}

	/// Selects a schema other than the default `public`.
	#[must_use]
	pub fn schema(mut self, schema: &str) -> Self {
		self.headers.insert("__schema".to_string(), schema.to_string());
		self
	}

	fn builder(self, method: reqwest::Method) -> Builder {
		let mut headers = self.headers.clone();
		if let Some(schema) = headers.remove("__schema") {
			let key = if matches!(method, reqwest::Method::GET | reqwest::Method::HEAD) {
				"Accept-Profile"
			} else {
				"Content-Profile"
			};
			headers.insert(key.to_string(), schema);
		}
		Builder {
			ctx: self.ctx,
			method,
			url: self.url,
			headers,
			body: None,
			is_maybe_single: false,
		}
	}

	/// `SELECT` over the given columns. `head` issues `HEAD` instead of
	/// `GET`; `count` adds `Prefer: count={algo}`.
	pub fn select(self, columns: &str, head: bool, count: Option<&str>) -> FilterBuilder {
		let method = if head {
			reqwest::Method::HEAD
		} else {
			reqwest::Method::GET
		};
		let mut builder = self.builder(method);
		let stripped = strip_whitespace_outside_quotes(columns);
		builder.url.query_pairs_mut().append_pair("select", &stripped);
		if let Some(algo) = count {
			add_prefer(&mut builder.headers, &format!("count={algo}"));
		}
		FilterBuilder::new(builder)
	}

	/// `INSERT` one or more rows.
	pub fn insert(self, values: Value, default_to_null: bool, count: Option<&str>) -> FilterBuilder {
		let mut builder = self.builder(reqwest::Method::POST);
		if let Value::Array(rows) = &values {
			let mut columns: Vec<String> = Vec::new();
			for row in rows {
				if let Value::Object(map) = row {
					for key in map.keys() {
						if !columns.contains(key) {
							columns.push(key.clone());
						}
					}
				}
			}
			if !columns.is_empty() {
				builder.url.query_pairs_mut().append_pair("columns", &columns.join(","));
			}
		}
		if !default_to_null {
			add_prefer(&mut builder.headers, "missing=default");
		}
		if let Some(algo) = count {
			add_prefer(&mut builder.headers, &format!("count={algo}"));
		}
		builder.body = Some(values);
		FilterBuilder::new(builder)
	}

	/// `INSERT ... ON CONFLICT`.
	pub fn upsert(self, values: Value, on_conflict: Option<&str>, ignore_duplicates: bool, count: Option<&str>) -> FilterBuilder {
		let mut builder = self.builder(reqwest::Method::POST);
		let resolution = if ignore_duplicates {
			"ignore-duplicates"
		} else {
			"merge-duplicates"
		};
		add_prefer(&mut builder.headers, &format!("resolution={resolution}"));
		if let Some(on_conflict) = on_conflict {
			builder.url.query_pairs_mut().append_pair("on_conflict", on_conflict);
		}
		if let Some(algo) = count {
			add_prefer(&mut builder.headers, &format!("count={algo}"));
		}
		builder.body = Some(values);
		FilterBuilder::new(builder)
	}

	/// `UPDATE`.
	pub fn update(self, values: Value, count: Option<&str>) -> FilterBuilder {
		let mut builder = self.builder(reqwest::Method::PATCH);
		if let Some(algo) = count {
			add_prefer(&mut builder.headers, &format!("count={algo}"));
		}
		builder.body = Some(values);
		FilterBuilder::new(builder)
	}

	/// `DELETE`.
	pub fn delete(self, count: Option<&str>) -> FilterBuilder {
		let mut builder = self.builder(reqwest::Method::DELETE);
		if let Some(algo) = count {
			add_prefer(&mut builder.headers, &format!("count={algo}"));
		}
		FilterBuilder::new(builder)
	}
}

pub(crate) fn add_prefer(headers: &mut IndexMap<String, String>, directive: &str) {
	let merged = crate::http::merge_prefer(headers.get("Prefer").map(String::as_str), directive);
	headers.insert("Prefer".to_string(), merged);
}

fn strip_whitespace_outside_quotes(input: &str) -> String {
	let mut out = String::with_capacity(input.len());
	let mut in_quotes = false;
	for c in input.chars() {
		if c == '"' {
			in_quotes = !in_quotes;
			out.push(c);
		} else if c.is_whitespace() && !in_quotes {
			continue;
		} else {
			out.push(c);
		}
	}
	out
}

/// Executes a built request and applies the response-workaround and
/// count-extraction rules common to every terminal builder.
pub(crate) async fn execute(builder: Builder) -> Result<QueryResponse> {
	let headers = crate::http::with_auth_headers(builder.ctx.resolver.as_ref(), &builder.ctx.apikey, builder.headers.clone()).await;
	let body = builder.body.map(Body::Json);
	let response = builder
		.ctx
		.http
		.request(
			builder.method.clone(),
			builder.url.clone(),
			IndexMap::new(),
			RequestOptions {
				headers,
				body,
				timeout: None,
				signal: None,
			},
		)
		.await?;

	if response.status == 404 {
		if let Ok(Value::Array(_)) = response.json() {
			return Ok(QueryResponse {
				data: Value::Array(vec![]),
				count: None,
				status: 200,
			});
		}
		if response.body.is_empty() {
			return Ok(QueryResponse {
				data: Value::Null,
				count: None,
				status: 204,
			});
		}
	}

	if let Some(error) = crate::error::classify_response(response.status, &response.body, response.header("x-relay-error")) {
		if builder.is_maybe_single {
			if let Some(context) = error.context() {
				if context.contains("0 rows") {
					return Ok(QueryResponse {
						data: Value::Null,
						count: None,
						status: 200,
					});
				}
			}
		}
		return Err(error);
	}

	let data = if response.body.is_empty() {
		Value::Null
	} else {
		response.json().unwrap_or(Value::Null)
	};

	let count = response.header("content-range").and_then(|range| range.split('/').nth(1)).and_then(|total| total.parse::<i64>().ok());

	if builder.is_maybe_single && builder.method == reqwest::Method::GET {
		if let Value::Array(mut rows) = data {
			return match rows.len() {
				0 => Ok(QueryResponse {
					data: Value::Null,
					count,
					status: response.status,
				}),
				1 => Ok(QueryResponse {
					data: rows.remove(0),
					count,
					status: response.status,
				}),
				_ => Err(Error::pgrst116_multiple_rows()),
			};
		}
	}

	Ok(QueryResponse {
		data,
		count,
		status: response.status,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	#[test]
	fn strips_whitespace_outside_quotes() {
		assert_eq!(strip_whitespace_outside_quotes("id, name"), "id,name");
		assert_eq!(strip_whitespace_outside_quotes(r#""a b", c"#), r#""a b",c"#);
	}

	#[test]
	fn merges_prefer_via_shared_helper() {
		let mut headers = IndexMap::new();
		add_prefer(&mut headers, "return=representation");
		add_prefer(&mut headers, "count=exact");
		assert_eq!(headers.get("Prefer").unwrap(), "return=representation,count=exact");
	}

	struct NoAuth;

	#[async_trait::async_trait]
	impl TokenResolver for NoAuth {
		async fn resolve(&self) -> String {
			"anon-key".to_string()
		}
	}

	fn builder_for(server: &MockServer) -> QueryBuilder {
		QueryBuilder::new(HttpPlane::new().unwrap(), Url::parse(&server.uri()).unwrap(), Arc::new(NoAuth), "anon-key".to_string(), "todos").unwrap()
	}

	#[tokio::test]
	async fn maybe_single_get_unwraps_a_single_row() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/todos"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"id": 1}])))
			.mount(&server)
			.await;

		let response = builder_for(&server).select("*", false, None).transform().maybe_single().await.unwrap();
		assert_eq!(response.data, serde_json::json!({"id": 1}));
	}

	#[tokio::test]
	async fn maybe_single_get_returns_null_for_zero_rows() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/todos"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
			.mount(&server)
			.await;

		let response = builder_for(&server).select("*", false, None).transform().maybe_single().await.unwrap();
		assert_eq!(response.data, Value::Null);
	}

	#[tokio::test]
	async fn maybe_single_get_synthesizes_pgrst116_for_multiple_rows() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/todos"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"id": 1}, {"id": 2}])))
			.mount(&server)
			.await;

		let error = builder_for(&server).select("*", false, None).transform().maybe_single().await.unwrap_err();
		assert_eq!(
			error.kind(),
			&crate::error::ErrorKind::Api {
				code: Some("PGRST116".to_string()),
				status: 406,
			}
		);
	}
}
