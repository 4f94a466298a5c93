//! HTTP request handlers

pub mod files;
pub mod health;
pub mod upload;

pub use files::list_files;
pub use health::health_check;
pub use upload::upload_file;
