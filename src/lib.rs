//! Cooperative user-space threads multiplexed on a single OS thread.
//!
//! A uthread is a stackful coroutine: each one gets its own fixed-size
//! stack and callee-saved register set, and runs to completion unless
//! it calls [`yield_now`] to give another uthread a turn. Scheduling is
//! strict FIFO round-robin, and everything here is confined to the OS
//! thread that calls it — there is no locking anywhere in this crate
//! because there is never anything to lock.
//!
//! ```no_run
//! uthreads::create(|| {
//!     println!("hello from uthread {}", uthreads::this_id());
//!     uthreads::yield_now();
//!     println!("back again, run #{}", uthreads::this_run_count());
//! }).unwrap();
//!
//! // Nothing runs until the host yields the OS thread to the queue.
//! uthreads::yield_now();
//! ```

mod arch;
mod error;
mod pool;
mod queue;
mod scheduler;
mod tcb;

pub use error::AllocError;
pub use scheduler::{
    create, free_unused, pool_size, preallocate, queue_size, this_id, this_run_count, yield_now,
};
