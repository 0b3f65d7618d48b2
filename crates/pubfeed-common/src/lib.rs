//! Pubfeed Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared building blocks for the pubfeed workspace members.
//!
//! # Overview
//!
//! - **Error Handling**: [`PubfeedError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Text**: whitespace and identifier normalization used by the source parsers
//! - **Checksums**: raw content fingerprints stored next to import snapshots
//!
//! # Example
//!
//! ```
//! use pubfeed_common::text::ensure_single_line;
//!
//! assert_eq!(ensure_single_line("  Breaking\n  News "), "Breaking News");
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod text;

// Re-export commonly used types
pub use error::{PubfeedError, Result};
