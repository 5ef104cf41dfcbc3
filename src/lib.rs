pub mod client;
pub mod config;
pub mod error;
pub mod pager;
pub mod receipts;
pub mod registry;
pub mod send;
pub mod sync;
pub mod transport;
pub mod types;
pub mod typing;

pub use client::ChatClient;
pub use config::ChatConfig;
pub use error::ChatError;
pub use transport::ChatTransport;
