pub mod error;
pub mod handler_utils;
pub mod images;
pub mod results;
pub mod server;
pub mod session;
