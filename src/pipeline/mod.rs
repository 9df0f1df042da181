//! Pipeline stages for re-hosting one external image.
//!
//! Each submodule implements exactly one step, behind a trait where the step
//! talks to the outside world, so tests can swap in fakes for the network
//! and the object store.
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ classify ──▶ upload ──▶ (audit)
//! (HTTP GET)  (magic bytes)  (object store)  (moderation)
//! ```
//!
//! 1. [`fetch`]:    download the source bytes with a timeout and size cap
//! 2. [`classify`]: decide the real format from the leading bytes; only
//!    PNG, JPEG, WEBP and GIF pass
//! 3. [`upload`]:   store under a content-addressed name and return the
//!    canonical URL
//! 4. [`rehost`]:   drive the three steps above plus optional moderation,
//!    collapsing every failure into the empty-string sentinel

pub mod classify;
pub mod fetch;
pub mod rehost;
pub mod upload;
