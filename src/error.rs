use thiserror::Error;

/// The global allocator could not supply a new uthread control block.
///
/// Returned by [`create`](crate::create) and
/// [`preallocate`](crate::preallocate); never fatal, the caller decides
/// whether to retry or give up. A failed `preallocate` call leaves any
/// TCBs it already allocated in the pool — there is no rollback.
#[derive(Debug, Error)]
#[error("failed to allocate a uthread control block")]
pub struct AllocError;
