//! Building blocks shared by both reclamation engines: exponential
//! backoff and writer waiter-queue coalescing.

pub mod backoff;
pub mod waiter;
