//! Builders for test datasets

mod documents;
mod test_data;

pub use documents::{docx_document, parquet_file, pdf_document, xlsx_workbook, zip_archive};
pub use test_data::{TestDataBuilder, sample_sentences};
