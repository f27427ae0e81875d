//! Uthread control block and its embedded stack (component C2).

use std::alloc::{self, Layout};
use std::ptr;

use crate::arch::RegSlots;
use crate::error::AllocError;

/// Fixed-size embedded stack per uthread: 2 MiB, matching the reference
/// implementation. Overflow is undetected; this crate does not place a
/// guard page.
pub(crate) const STACK_SIZE: usize = 1 << 21;

/// The closure a uthread runs, boxed so it can be stored behind an
/// opaque pointer and invoked exactly once.
pub(crate) type Body = Box<dyn FnOnce()>;

/// The embedded stack region. `repr(C, align(16))` gives the whole TCB
/// (and thus the stack's high end) the alignment the architecture's
/// call-frame conventions need.
#[repr(C, align(16))]
pub(crate) struct Stack([u8; STACK_SIZE]);

/// Uthread control block.
///
/// Allocated once per uthread id and reused via the pool (see
/// [`crate::scheduler`] for the lifecycle). A TCB is never moved once
/// allocated: `regs` may hold a saved stack pointer into `stack`, and
/// `next`/`prev` are raw pointers other TCBs hold into this one.
pub(crate) struct Tcb {
    pub next: *mut Tcb,
    pub prev: *mut Tcb,
    pub id: usize,
    pub run_cnt: usize,
    pub body: Option<Body>,
    pub regs: RegSlots,
    /// Only ever addressed via [`Tcb::stack_top`], never read as a value.
    stack: Stack,
}

impl Tcb {
    fn layout() -> Layout {
        Layout::new::<Tcb>()
    }

    /// Allocate a single TCB on the heap via the raw global allocator
    /// (not `Box::new`, which aborts on OOM) so that allocation failure
    /// can be reported as [`AllocError`] instead of aborting the
    /// process. Every field except `stack` is initialized; `stack` is
    /// left as whatever bytes the allocator returned, exactly like the
    /// reference's `malloc` (not `calloc`) — it is only ever addressed
    /// by the `arch` primitives, never read as a Rust value.
    ///
    /// # Safety
    ///
    /// The returned pointer is owned by the caller, who must eventually
    /// pass it to [`Tcb::dealloc`] exactly once.
    pub unsafe fn try_new(id: usize) -> Result<*mut Tcb, AllocError> {
        let raw = unsafe { alloc::alloc(Self::layout()) } as *mut Tcb;
        if raw.is_null() {
            return Err(AllocError);
        }
        unsafe {
            ptr::addr_of_mut!((*raw).next).write(ptr::null_mut());
            ptr::addr_of_mut!((*raw).prev).write(ptr::null_mut());
            ptr::addr_of_mut!((*raw).id).write(id);
            ptr::addr_of_mut!((*raw).run_cnt).write(0);
            ptr::addr_of_mut!((*raw).body).write(None);
            ptr::addr_of_mut!((*raw).regs).write(RegSlots::default());
        }
        Ok(raw)
    }

    /// Drop and free a TCB previously returned by [`Tcb::try_new`].
    ///
    /// # Safety
    ///
    /// `tcb` must not be referenced (via pool, queue, or otherwise)
    /// after this call.
    pub unsafe fn dealloc(tcb: *mut Tcb) {
        unsafe {
            ptr::drop_in_place(tcb);
            alloc::dealloc(tcb as *mut u8, Self::layout());
        }
    }

    /// Top-of-stack pointer for this TCB: 16 bytes below the region's
    /// upper bound, reserving headroom so the first call inside the
    /// uthread observes a correctly aligned stack pointer.
    ///
    /// # Safety
    ///
    /// `tcb` must point at a live, fully-allocated `Tcb`.
    pub unsafe fn stack_top(tcb: *mut Tcb) -> *mut u8 {
        let stack = unsafe { ptr::addr_of_mut!((*tcb).stack) } as *mut u8;
        unsafe { stack.add(STACK_SIZE - 16) }
    }
}
