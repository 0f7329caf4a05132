//! Transport Layer for the Serving Endpoint
//!
//! Provides one abstraction over the two ways of streaming a response:
//! - `ChatCompletionsTransport`: SDK-style chat-completions call, PAT auth
//! - `InvocationsTransport`: raw `/invocations` POST parsed as SSE, OBO auth
//!
//! # Design Philosophy
//!
//! The transport is chosen once per session by the [`TransportSelector`] and
//! never revisited. Everything above this layer sees only [`FrameStream`]s of
//! [`RawFrame`]s and the [`ClientError`] taxonomy.
//!
//! # Security
//!
//! - Bearer tokens are only ever placed in the `Authorization` header
//! - Tokens never appear in log fields or `Debug` output

pub mod chat_completions;
pub mod config;
pub mod frame;
pub mod invocations;
mod pump;
mod response;
pub mod selector;
pub mod sse;
pub mod traits;

// Re-exports for convenience
pub use chat_completions::ChatCompletionsTransport;
pub use config::{AuthModeSetting, StreamSettings};
pub use frame::{ChatCompletionChunk, RawFrame, SseRecord};
pub use invocations::InvocationsTransport;
pub use selector::{AvailableCredentials, BoundSession, TransportSelector};
pub use sse::{SseDecoder, DONE_SENTINEL};
pub use traits::{AuthErrorKind, ClientError, FrameResult, FrameStream, InferenceTransport};
