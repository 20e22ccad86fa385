//! TransformBuilder: order/range/single/csv/...

use std::future::IntoFuture;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::postgrest::{add_prefer, execute, Builder, QueryResponse};

/// The narrowest builder stage: only transforms and awaiting remain.
pub struct TransformBuilder {
	inner: Builder,
}

impl TransformBuilder {
	pub(crate) fn new(inner: Builder) -> Self {
		Self {
			inner,
		}
	}

	/// Appends to the `order` (or `{table}.order`) parameter; repeated calls
	/// compound via commas.
	#[must_use]
	pub fn order(mut self, column: &str, ascending: bool, nulls_first: Option<bool>, referenced_table: Option<&str>) -> Self {
		let mut segment = column.to_string();
		segment.push('.');
		segment.push_str(if ascending {
			"asc"
		} else {
			"desc"
		});
		if let Some(nulls_first) = nulls_first {
			segment.push('.');
			segment.push_str(if nulls_first {
				"nullsfirst"
			} else {
				"nullslast"
			});
		}
		let key = match referenced_table {
			Some(table) => format!("{table}.order"),
			None => "order".to_string(),
		};
		let existing = self
			.inner
			.url
			.query_pairs()
			.find(|(k, _)| k == key.as_str())
			.map(|(_, v)| v.into_owned());
		let combined = match existing {
			Some(existing) => format!("{existing},{segment}"),
			None => segment,
		};
		set_query_param(&mut self.inner.url, &key, &combined);
		self
	}

	/// `offset=from&limit=to-from+1`.
	#[must_use]
	pub fn range(mut self, from: i64, to: i64, referenced_table: Option<&str>) -> Self {
		let (offset_key, limit_key) = match referenced_table {
			Some(table) => (format!("{table}.offset"), format!("{table}.limit")),
			None => ("offset".to_string(), "limit".to_string()),
		};
		set_query_param(&mut self.inner.url, &offset_key, &from.to_string());
		set_query_param(&mut self.inner.url, &limit_key, &(to - from + 1).to_string());
		self
	}

	/// `limit={count}`.
	#[must_use]
	pub fn limit(mut self, count: i64, referenced_table: Option<&str>) -> Self {
		let key = match referenced_table {
			Some(table) => format!("{table}.limit"),
			None => "limit".to_string(),
		};
		set_query_param(&mut self.inner.url, &key, &count.to_string());
		self
	}

	/// Requests a single row: `Accept: application/vnd.pgrst.object+json`.
	#[must_use]
	pub fn single(mut self) -> Self {
		self.inner.headers.insert("Accept".to_string(), "application/vnd.pgrst.object+json".to_string());
		self
	}

	/// Like `single()`, but 0 rows yields `null` instead of an error on GET,
	/// and 2+ rows synthesize a PGRST116 error.
	#[must_use]
	pub fn maybe_single(mut self) -> Self {
		let accept = if self.inner.method == reqwest::Method::GET {
			"application/json"
		} else {
			"application/vnd.pgrst.object+json"
		};
		self.inner.headers.insert("Accept".to_string(), accept.to_string());
		self.inner.is_maybe_single = true;
		self
	}

	/// Requests CSV output.
	#[must_use]
	pub fn csv(mut self) -> Self {
		self.inner.headers.insert("Accept".to_string(), "text/csv".to_string());
		self
	}

	/// Requests GeoJSON output.
	#[must_use]
	pub fn geojson(mut self) -> Self {
		self.inner.headers.insert("Accept".to_string(), "application/geo+json".to_string());
		self
	}

	/// Requests the query plan via `Accept: application/vnd.pgrst.plan`.
	#[must_use]
	pub fn explain(mut self, analyze: bool, verbose: bool, format_text: bool) -> Self {
		let mut accept = "application/vnd.pgrst.plan".to_string();
		let mut options = Vec::new();
		if analyze {
			options.push("analyze");
		}
		if verbose {
			options.push("verbose");
		}
		if !options.is_empty() {
			accept.push('+');
			accept.push_str(&options.join("|"));
		}
		if format_text {
			accept.push_str(";options=text");
		}
		self.inner.headers.insert("Accept".to_string(), accept);
		self
	}

	/// Rolls back the statement server-side even on success (dry run).
	#[must_use]
	pub fn rollback(mut self) -> Self {
		add_prefer(&mut self.inner.headers, "tx=rollback");
		self
	}

	/// Caps how many rows a mutation may affect (`Prefer: max-affected`).
	#[must_use]
	pub fn max_affected(mut self, count: i64) -> Self {
		add_prefer(&mut self.inner.headers, &format!("max-affected={count}"));
		self
	}

	async fn execute(self) -> Result<QueryResponse> {
		execute(self.inner).await
	}
}

fn set_query_param(url: &mut url::Url, key: &str, value: &str) {
	let pairs: Vec<(String, String)> = url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).filter(|(k, _)| k != key).collect();
	url.query_pairs_mut().clear().extend_pairs(pairs).append_pair(key, value);
}

impl IntoFuture for TransformBuilder {
	type Output = Result<QueryResponse>;
	type IntoFuture = BoxFuture<'static, Result<QueryResponse>>;

	fn into_future(self) -> Self::IntoFuture {
		Box::pin(self.execute())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_url() -> url::Url {
		url::Url::parse("https://example.test/rest/v1/todos").unwrap()
	}

	#[test]
	fn range_computes_offset_and_limit() {
		let mut url = test_url();
		set_query_param(&mut url, "offset", "0");
		set_query_param(&mut url, "limit", "10");
		assert!(url.query().unwrap().contains("offset=0"));
		assert!(url.query().unwrap().contains("limit=10"));
	}

	#[test]
	fn set_query_param_overwrites_existing_key() {
		let mut url = test_url();
		set_query_param(&mut url, "limit", "5");
		set_query_param(&mut url, "limit", "10");
		assert_eq!(url.query_pairs().filter(|(k, _)| k == "limit").count(), 1);
	}
}
