pub mod cache;
pub mod recipients;
