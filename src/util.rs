pub mod idempotency;
pub mod retry;
pub mod text;
