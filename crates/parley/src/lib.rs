pub mod chat;
pub mod config;
pub mod errors;
pub mod models;
pub mod request;
pub mod store;
pub mod stream;
pub mod transport;

pub use chat::Chat;
pub use config::{ClientConfig, Settings};
pub use errors::{ParleyError, ParleyResult};
pub use stream::{StreamEvent, StreamResults};
