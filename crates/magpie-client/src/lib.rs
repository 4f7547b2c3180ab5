pub mod alert;
pub mod fetch;
pub mod headers;

pub use alert::WebhookAlerter;
pub use fetch::{FetchClient, FetchOptions, Fetched};
pub use headers::HeaderState;
