//! Session engine for strata publish/subscribe clients.
//!
//! A [`Session`] is a logical connection to a server. Through it a client:
//!
//! - **subscribes** to topics and receives values on typed [`ValueStream`]s,
//!   selector-bound or fallback ([`Topics`])
//! - **fetches** topic snapshots with ranges, type filters and limits
//! - **updates** topics with one-shot sets or stateful [`UpdateStream`]s,
//!   optionally guarded by [`UpdateConstraint`](strata_topics::UpdateConstraint)s
//!   ([`TopicUpdate`])
//! - **appends and edits** time series events ([`TimeSeries`])
//! - **sends and handles requests** addressed to paths, sessions or session
//!   filters ([`Messaging`])
//! - **acquires session locks** scoped to the connection or the session
//!
//! Server pushes are dispatched by a single event loop per session, so each
//! stream sees its events in the order the server produced them.
//!
//! # Servers
//!
//! The engine talks to servers through the [`Connector`] and
//! [`ServerConnection`] traits. [`LocalServer`] is an in-process
//! implementation with fault injection for tests and embedding.

pub mod config;
pub mod connection;
pub mod filter;
pub mod lock;
pub mod messaging;
pub mod server;
pub mod session;
pub mod state;
pub mod stream;
pub mod time_series;
pub mod topics;
pub mod update;

mod dispatch;
mod registry;

pub use config::{ReconnectionConfig, SessionConfig};
pub use connection::{Connector, ServerConnection, SessionId};
pub use filter::SessionFilter;
pub use lock::{LockAttempt, LockScope, SessionLock};
pub use messaging::{
    Messaging, Registration, RequestContext, RequestHandler, RequestTarget, Responder, ResponseStream,
};
pub use server::{LocalConnector, LocalServer, ReconnectPolicy};
pub use session::Session;
pub use state::{CloseReason, SessionState, SessionStateChange};
pub use stream::{StreamEvent, StreamHandle, UnsubscribeReason, ValueStream};
pub use time_series::TimeSeries;
pub use topics::{FetchResult, FetchTopicResult, Topics};
pub use update::{TopicCreationResult, TopicUpdate, UpdateStream, UpdateStreamBuilder};

pub use strata_topics::SessionError;
