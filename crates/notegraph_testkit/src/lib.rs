//! # notegraph testkit
//!
//! Test utilities for notegraph.
//!
//! This crate provides:
//! - Test fixtures and graph helpers
//! - Property-based generators of mutation sequences using proptest
//! - A replica harness that syncs graphs through the real sync engine
//!
//! ## Usage
//!
//! ```rust,ignore
//! use notegraph_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_graph() {
//!     with_temp_graph(|graph| {
//!         let tracker = graph.tracker();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod replica;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::replica::*;
}

pub use fixtures::*;
pub use generators::*;
pub use replica::*;
