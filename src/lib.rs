pub mod cfg;
pub mod error;
pub mod logger;
pub mod notification;
pub mod server;
pub mod store;
pub mod transport;
