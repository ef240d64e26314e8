pub mod api;
pub mod error;
pub mod request_meta;
