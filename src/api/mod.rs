pub mod auth;
pub mod errors;
pub mod ingest;
pub mod recipients;
