//! Bridge Core - Streaming Client for Agent Serving Endpoints
//!
//! This crate turns the heterogeneous streaming protocol of a remote
//! multi-agent serving endpoint into one ordered stream of canonical
//! events, while keeping the conversation sent back to the endpoint bounded
//! and the database credential used alongside it alive.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 Renderer / Transcript store (external)           │
//! └───────────────▲──────────────────────────────────┬───────────────┘
//!                 │ CanonicalEvent (in order)        │ Message[]
//! ┌───────────────┼──────────────────────────────────┼───────────────┐
//! │               │          TurnDriver              ▼               │
//! │  ┌────────────┴─────┐  ┌───────────────┐  ┌──────────────────┐   │
//! │  │ EventNormalizer  │◄─│  FrameStream  │◄─│ HistoryWindower  │   │
//! │  └──────────────────┘  └───────▲───────┘  └──────────────────┘   │
//! │                                │                                 │
//! │             ┌──────────────────┴──────────────────┐              │
//! │             │   InferenceTransport (per session)  │              │
//! │  ┌──────────┴───────────┐          ┌──────────────┴──────────┐   │
//! │  │ ChatCompletions (PAT)│          │ Invocations / SSE (OBO) │   │
//! │  └──────────────────────┘          └─────────────────────────┘   │
//! │                                                                  │
//! │  LeaseManager ── CredentialIssuer (database credentials)         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`TransportSelector`]: binds a session to one transport for its lifetime
//! - [`TurnDriver`]: runs one user turn end to end
//! - [`EventNormalizer`]: maps raw frames to [`CanonicalEvent`]s
//! - [`HistoryWindower`]: bounds the outbound conversation
//! - [`LeaseManager`]: single-flight database credential refresh
//!
//! # Quick Start
//!
//! ```ignore
//! use bridge_core::{
//!     load_config, AvailableCredentials, BearerToken, Message, TransportSelector, TurnDriver,
//! };
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let selector = TransportSelector::new(config.auth_mode, &config.stream)?;
//!     let bound = selector.bind(
//!         config.endpoint()?,
//!         AvailableCredentials::pat(BearerToken::new("dapi...")),
//!     )?;
//!
//!     let (tx, mut rx) = mpsc::channel(100);
//!     let transcript = vec![Message::user("What changed last week?", 0)];
//!     let driver = TurnDriver::new(config.history);
//!     let turn = driver.run(&bound, &transcript, &tx, &CancellationToken::new());
//!
//!     // Render events as they arrive while the turn runs
//!     let render = async {
//!         while let Some(event) = rx.recv().await {
//!             println!("{event:?}");
//!         }
//!     };
//!     let (outcome, ()) = tokio::join!(turn, render);
//!     println!("{:?}", outcome?.status);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: TOML + environment configuration
//! - [`credentials`]: credential leases and the HTTP issuer
//! - [`events`]: the canonical event model
//! - [`history`]: history windowing
//! - [`messages`]: transcript messages
//! - [`normalizer`]: raw frame normalization
//! - [`session`]: sessions, auth modes and endpoint identity
//! - [`transport`]: the two streaming transports and their selector
//! - [`turn`]: the per-turn driver

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod credentials;
pub mod events;
pub mod history;
pub mod messages;
pub mod normalizer;
pub mod session;
pub mod transport;
pub mod turn;

// Re-exports for convenience
pub use config::{load_config, load_config_from_path, BridgeConfig, ConfigError, ConfigOverrides};
pub use credentials::{
    CredentialError, CredentialIssuer, HttpCredentialIssuer, LeaseManager, LeaseValue,
    MintError, MintedCredential,
};
pub use events::{CanonicalEvent, StreamErrorKind};
pub use history::{BoundedHistory, HistoryError, HistoryLimits, HistoryWindower};
pub use messages::{Message, Role};
pub use normalizer::EventNormalizer;
pub use session::{AuthMode, BearerToken, EndpointIdentity, Session, SessionId};
pub use transport::{
    AuthErrorKind, AuthModeSetting, AvailableCredentials, BoundSession, ClientError, FrameStream,
    InferenceTransport, RawFrame, StreamSettings, TransportSelector,
};
pub use turn::{TurnDriver, TurnError, TurnOutcome, TurnStatus};
