//! HTTP middleware stack.
//!
//! Re-exports the trace module and the [`TraceLayer`] type. There is no
//! `auth` module: client authentication is explicitly out of scope
//! (SPEC_FULL.md §1, §10.5).

pub mod cors;
pub mod trace;

pub use trace::TraceLayer;
