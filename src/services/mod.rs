pub mod extractor;
pub mod staging;
pub mod vision;
