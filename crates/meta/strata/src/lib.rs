//! # strata
//!
//! Meta-crate re-exporting the strata library crates for convenient
//! dependency declaration.
//!
//! Instead of depending on each crate individually:
//!
//! ```toml
//! [dependencies]
//! strata-topics = "0.1"
//! strata-session = "0.1"
//! ```
//!
//! You can depend on the meta-crate:
//!
//! ```toml
//! [dependencies]
//! strata = "0.1"
//! ```
//!
//! ## Crate Family
//!
//! - `strata-topics`: topic paths, selectors, values, constraints, time series
//! - `strata-session`: session engine, value streams, update streams, messaging, locks

/// Topic model: paths, selectors, specifications, values, constraints, time series.
pub use strata_topics as topics;

/// Session engine: streams, fetch, updates, messaging, session locks, local server.
pub use strata_session as session;
