//! Hub connection engine.
//!
//! Connects to a hub endpoint over a negotiated transport (WebSocket,
//! Server-Sent-Events, or HTTP long-polling), exchanges the protocol
//! handshake, and exposes invoke/send/stream/on to the application, with
//! optional automatic reconnection.
//!
//! ```no_run
//! use hublink_client::{HubConnection, ConnectionError};
//! use serde_json::json;
//! use url::Url;
//!
//! # async fn example() -> Result<(), ConnectionError> {
//! let connection = HubConnection::builder(
//!     Url::parse("https://example.com/chathub").expect("valid url"),
//! )
//! .with_default_reconnect()
//! .build()?;
//!
//! connection.on("ReceiveMessage", |args| {
//!     println!("message: {args:?}");
//! });
//!
//! connection.start().await?;
//! let sum: i64 = connection.invoke("Add", vec![json!(2), json!(3)]).await?;
//! assert_eq!(sum, 5);
//! connection.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod reconnect;
pub mod types;

mod handlers;
mod http;
mod lifecycle;
mod negotiate;
mod pumps;
mod registry;
mod transport;

pub use config::{AccessTokenProvider, ConnectionOptions, HttpOptions};
pub use connection::{HubConnection, HubConnectionBuilder, StreamHandle, UploadStream};
pub use error::ConnectionError;
pub use reconnect::{DefaultReconnectPolicy, ReconnectPolicy, RetryContext};
pub use transport::TransportKind;
pub use types::{ConnectionState, HandlerRegistration};

// The wire protocol is part of this crate's API surface (message values,
// argument extraction, protocol selection).
pub use hublink_protocol as protocol;
pub use hublink_protocol::{JsonProtocol, MessagePackProtocol};
