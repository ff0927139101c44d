//! Document storage core for a markdown-native knowledge base.
//!
//! Entries are markdown documents persisted inside a workspace, with every
//! edit recorded as an immutable revision under optimistic concurrency
//! control. Content integrity is tracked with a SHA-256 checksum and a
//! workspace-keyed HMAC signature. A rebuildable structured index plus an
//! inverted keyword index are derived from the stored markdown and serve
//! the query engine. Form (schema) definitions validate entry properties
//! and drive batch migrations that rewrite entry bodies in place.
//!
//! Storage is an injected [`opendal::Operator`]; all functions take the
//! operator together with a workspace path prefix, so the same code runs
//! against the local filesystem or the in-memory backend used by tests.

pub mod diff;
pub mod entry;
pub mod error;
pub mod form;
pub mod index;
pub mod integrity;
pub mod link;
pub mod markdown;
pub mod query;
pub mod storage;
pub mod workspace;
