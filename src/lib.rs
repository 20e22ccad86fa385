#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Client-side runtime for a Backend-as-a-Service platform: a realtime
//! WebSocket transport, a session/auth engine, and a PostgREST-style query
//! builder, all sharing one HTTP plane and error classifier.
//!
//! # Example
//!
//! ```no_run
//! use supabase_rs::{ClientOptions, SupabaseClient};
//!
//! # #[tokio::main]
//! # async fn main() -> supabase_rs::Result<()> {
//! let client = SupabaseClient::new("https://abcd.supabase.co", "anon-key", ClientOptions::default())?;
//!
//! let session = client
//!     .auth()
//!     .expect("built-in session engine")
//!     .sign_in_with_password("user@example.com", "hunter2")
//!     .await?;
//!
//! let rows = client
//!     .from("todos")?
//!     .select("id,title", false, None)
//!     .eq("done", "false")
//!     .await?;
//!
//! println!("{} {:?}", session.access_token, rows.data);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod http;
pub mod jwt;
pub mod lock;
pub mod pkce;
pub mod postgrest;
pub mod realtime;
pub mod storage;

pub use client::{ClientOptions, FunctionsClient, RealtimeOptions, StorageClient, SupabaseClient};
pub use error::{Error, ErrorKind, Result};
