pub mod billing;
pub mod messages;
pub mod threads;

// Re-exports for convenience.
pub use billing::{BillingLedger, DeductOutcome, MemoryLedger};
pub use messages::{MessageStore, NewMessage};
pub use threads::ThreadStore;
