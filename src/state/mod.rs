//! Scraper lifecycle tracking
//!
//! Every entity scraper moves through
//! `Uninitialized -> SessionOpen -> RecordResolved -> FieldsPopulated -> Closed`.
//! `FieldsPopulated` is a lattice rather than a single state: each field moves
//! from absent to present on its own, tracked by [`Lifecycle`].

mod scraper_state;

pub use scraper_state::{FieldState, Lifecycle, ScraperState, TransitionError};
