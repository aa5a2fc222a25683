//! Test utilities for DataForge
//!
//! This crate provides payload builders, binary document fixtures and mock
//! collaborators (source fetchers, quality models) for testing the engine.

pub mod builders;
pub mod mocks;

// Re-export commonly used types
pub use builders::{
    TestDataBuilder, docx_document, parquet_file, pdf_document, sample_sentences, xlsx_workbook,
    zip_archive,
};
pub use mocks::{MockFetcher, MockQualityModel};
