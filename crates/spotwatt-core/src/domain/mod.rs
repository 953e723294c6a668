//! # Domain Models
//!
//! Canonical types shared by the parser, the orchestrator and consumers.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`UtcDateTime`] | UTC timestamp with RFC3339 and compact platform formats |
//! | [`RawPricePoint`] | Parsed document point in the document's unit |
//! | [`PricePoint`] | Enriched day-ahead price handed to consumers |

mod price;
mod timestamp;

pub use price::{dedupe_sorted, PricePoint, RawPricePoint};
pub use timestamp::UtcDateTime;
