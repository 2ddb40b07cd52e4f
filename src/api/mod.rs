pub mod client;
pub mod oneshot;
pub mod retry;

pub use oneshot::translate_phrase;
pub use retry::{execute_with_retry, RetryPolicy};
