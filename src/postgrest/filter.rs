//! FilterBuilder: PostgREST filter composition.
//!
//! Every filter appends a `column=op.value` query segment verbatim onto the
//! accumulated URL.

use std::future::IntoFuture;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::postgrest::transform::TransformBuilder;
use crate::postgrest::{execute, Builder, QueryResponse};

/// A builder that still accepts filter calls (`.eq()`, `.gt()`, ...).
pub struct FilterBuilder {
	pub(crate) inner: Builder,
}

macro_rules! comparison_operator {
	($name:ident, $op:literal) => {
		#[doc = concat!("Appends a `column=", $op, ".value` filter segment.")]
		#[must_use]
		pub fn $name(self, column: &str, value: &str) -> Self {
			self.filter(column, $op, value)
		}
	};
}

impl FilterBuilder {
	pub(crate) fn new(inner: Builder) -> Self {
		Self {
			inner,
		}
	}

	/// Escape hatch: appends `column=op.value` verbatim.
	#[must_use]
	pub fn filter(mut self, column: &str, op: &str, value: &str) -> Self {
		self.inner.url.query_pairs_mut().append_pair(column, &format!("{op}.{value}"));
		self
	}

	comparison_operator!(eq, "eq");
	comparison_operator!(neq, "neq");
	comparison_operator!(gt, "gt");
	comparison_operator!(gte, "gte");
	comparison_operator!(lt, "lt");
	comparison_operator!(lte, "lte");
	comparison_operator!(is, "is");
	comparison_operator!(is_distinct, "isdistinct");
	comparison_operator!(like, "like");
	comparison_operator!(ilike, "ilike");
	comparison_operator!(like_all, "like(all)");
	comparison_operator!(like_any, "like(any)");
	comparison_operator!(ilike_all, "ilike(all)");
	comparison_operator!(ilike_any, "ilike(any)");
	comparison_operator!(imatch, "imatch");
	comparison_operator!(contains, "cs");
	comparison_operator!(contained_by, "cd");
	comparison_operator!(overlaps, "ov");
	comparison_operator!(range_gt, "sr");
	comparison_operator!(range_gte, "nxl");
	comparison_operator!(range_lt, "sl");
	comparison_operator!(range_lte, "nxr");
	comparison_operator!(range_adjacent, "adj");

	/// `column=match.value` — bulk equality against a JSON object of
	/// `{column: value}` pairs is handled by the caller expanding columns;
	/// this is the single-column escape.
	#[must_use]
	pub fn column_match(self, column: &str, value: &str) -> Self {
		self.filter(column, "match", value)
	}

	/// Full-text search, with an optional `(config)` prefix and a search
	/// kind of `fts`/`plfts`/`phfts`/`wfts`.
	#[must_use]
	pub fn text_search(self, column: &str, query: &str, kind: &str, config: Option<&str>) -> Self {
		let op = match config {
			Some(config) => format!("{kind}({config})"),
			None => kind.to_string(),
		};
		self.filter(column, &op, query)
	}

	/// `column=in.(a,b,c)`, quoting any value containing `,`, `(`, or `)`.
	#[must_use]
	pub fn is_in(self, column: &str, values: &[&str]) -> Self {
		let rendered: Vec<String> = values.iter().map(|v| quote_if_needed(v)).collect();
		self.filter(column, "in", &format!("({})", rendered.join(",")))
	}

	/// Negates the next filter: `not.column=op.value`.
	#[must_use]
	pub fn not(mut self, column: &str, op: &str, value: &str) -> Self {
		self.inner.url.query_pairs_mut().append_pair(column, &format!("not.{op}.{value}"));
		self
	}

	/// `or=(filter1,filter2,...)`.
	#[must_use]
	pub fn or(mut self, filters: &str, referenced_table: Option<&str>) -> Self {
		let key = match referenced_table {
			Some(table) => format!("{table}.or"),
			None => "or".to_string(),
		};
		self.inner.url.query_pairs_mut().append_pair(&key, &format!("({filters})"));
		self
	}

	/// Transitions into the narrower transform stage.
	#[must_use]
	pub fn transform(self) -> TransformBuilder {
		TransformBuilder::new(self.inner)
	}

	async fn execute(self) -> Result<QueryResponse> {
		execute(self.inner).await
	}
}

fn quote_if_needed(value: &str) -> String {
	if value.contains(',') || value.contains('(') || value.contains(')') {
		format!("\"{value}\"")
	} else {
		value.to_string()
	}
}

impl IntoFuture for FilterBuilder {
	type Output = Result<QueryResponse>;
	type IntoFuture = BoxFuture<'static, Result<QueryResponse>>;

	fn into_future(self) -> Self::IntoFuture {
		Box::pin(self.execute())
	}
}

/// Deserializes a [`QueryResponse`]'s `data` into `T`.
pub fn decode<T: DeserializeOwned>(response: &QueryResponse) -> Result<T> {
	serde_json::from_value(response.data.clone()).map_err(crate::error::Error::from)
}

#[cfg(test)]
mod tests {
	use super::quote_if_needed;

	#[test]
	fn quotes_values_with_commas_or_parens() {
		assert_eq!(quote_if_needed("a,b"), "\"a,b\"");
		assert_eq!(quote_if_needed("(x)"), "\"(x)\"");
		assert_eq!(quote_if_needed("plain"), "plain");
	}
}
