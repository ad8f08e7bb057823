//! A protocol-translating reverse proxy: clients speak any supported vendor's
//! chat-completion wire format, the gateway forwards to any configured upstream
//! model regardless of which vendor actually serves it, translating the
//! request and (streaming or not) response back into the client's own dialect.
//!
//! Module map:
//! - [`model`] — the vendor-neutral request/response types everything else
//!   speaks internally.
//! - [`adapters`] — vendor wire format <-> internal model, both directions.
//! - [`providers`] — internal model <-> a specific upstream vendor's API.
//! - [`pipeline`] — the plugin chain (auth, routing, prompt rewriting,
//!   redaction) that runs around every request.
//! - [`merge`] — folds a streaming chunk sequence back into a single response.
//! - [`context`] — the per-request mutable state the pipeline patches.
//! - [`config`] — typed configuration loaded from YAML.
//! - [`registry`] — builds the adapter/provider/pipeline tables from config.
//! - [`error`] — the shared error taxonomy.
//! - [`dispatcher`] — the axum HTTP surface tying everything together.

pub mod adapters;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod providers;
pub mod registry;
