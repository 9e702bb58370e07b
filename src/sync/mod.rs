//! Synchronization between fibers.
//!
//! - [`Promise`]: a write-once variable fibers can await
//! - [`Ref`]: a lock-free mutable cell updated by compare-and-swap
//! - [`RefM`]: a mutable cell whose updates are effects, run one at a time
//! - [`Semaphore`]: FIFO permits, released on every exit path
//!
//! Waiting on any of these suspends only the waiting fiber, never a worker
//! thread, and every wait can be interrupted.

mod promise;
mod ref_m;
mod reference;
mod semaphore;

pub use promise::Promise;
pub use ref_m::RefM;
pub use reference::Ref;
pub use semaphore::Semaphore;
