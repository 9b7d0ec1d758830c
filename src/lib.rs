//! `trino-http` is an async client for the Trino HTTP statement protocol.
//!
//! A statement is submitted with a `POST` to `/v1/statement` and its results
//! are read by following `nextUri` links. This crate wraps that exchange:
//! - [`TrinoClient::query`] streams decoded rows as [`Records`]
//! - [`TrinoClient::pages`] streams raw result [`Pages`]
//! - [`TrinoClient::execute`] drains a statement and returns its final status
//!
//! Pages are fetched ahead of the consumer by a background task, bounded by
//! [`ClientOptions::buffer_size_bytes`]. Session changes announced by the
//! server (`SET SESSION`, `USE`, `PREPARE`, ...) are merged into the client's
//! [`ClientSession`] when a query finishes.

pub mod auth;
mod buffer;
mod client;
pub mod codec;
mod decimal;
mod error;
mod headers;
mod options;
mod pages;
mod params;
mod protocol;
mod records;
mod session;
mod state;
mod sync;
mod types;
mod value;
mod wire;

pub use auth::{
    BasicAuth, BearerAuth, Credential, LdapAuth, OAuthClientCredentials, TokenProviderAuth,
    TokenSource,
};
pub use client::TrinoClient;
pub use decimal::BigDecimal;
pub use error::TrinoError;
pub use headers::ProtocolHeaders;
pub use options::ClientOptions;
pub use pages::Pages;
pub use params::{QueryParameter, Statement, StatusListener};
pub use protocol::StatementClient;
pub use records::Records;
pub use session::{ClientSession, SelectedRole, SessionProperties, SessionUpdate};
pub use state::QueryState;
pub use types::{
    Column, ErrorLocation, FailureInfo, NodeVersion, Page, QueryError, QueryStats, QueryStatus,
    ServerInfo, Warning,
};
pub use value::{FromValue, IntervalYearToMonth, Value};

/// Re-exported so callers can cancel statements without depending on `tokio-util`.
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, TrinoError>;
