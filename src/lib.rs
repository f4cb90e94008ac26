//! Parley
//!
//! The exchange engine underneath an HTTP client: a lock-free completion state
//! machine for each request/response pair, one-exchange-at-a-time connection
//! binding, and conversations which chain redirects behind a single result handle.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::fmt;

pub mod client;
pub use client::Client;

/// A boxed error which can be sent across threads.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub(crate) struct DebugLiteral<T: fmt::Display>(T);

impl<T: fmt::Display> fmt::Debug for DebugLiteral<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
