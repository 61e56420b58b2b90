//! HTTP Route Handlers

pub mod ingestion;
pub mod live;
pub mod records;
pub mod sensors;
