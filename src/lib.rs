pub mod address;
pub mod api;
pub mod config;
pub mod mailbox;
pub mod query;
pub mod server;
pub mod source;
pub mod storage;
