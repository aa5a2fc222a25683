//! Mock implementations for testing

mod fetcher;
mod models;

pub use fetcher::MockFetcher;
pub use models::MockQualityModel;
