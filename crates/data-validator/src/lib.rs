//! Data Decoding and Validation
//!
//! Turns raw broker payloads into candidate readings and normalizes the
//! paging and time-window parameters accepted by the query endpoints.

mod error;
mod query;
mod reading;

pub use error::DecodeError;
pub use query::{
    record_limit, Page, TimeWindow, DEFAULT_PAGE_LIMIT, DEFAULT_RECORD_LIMIT, MAX_RECORD_LIMIT,
};
pub use reading::Reading;
