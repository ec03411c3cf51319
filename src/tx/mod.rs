//! Transaction submission module with nonce allocation and retry handling

mod dispatcher;
mod gas;
mod lock;
mod nonce;

pub use dispatcher::{AccountSummary, Dispatcher, NonceStatus};
pub use nonce::NonceAllocator;
