//! Per-OS-thread scheduler state and the host/uthread regime transitions
//! (component C4), plus the public surface built on top of it.
//!
//! All state lives in a single [`thread_local!`] cell; nothing here is
//! shared across OS threads, and nothing here takes a lock. The cell is
//! a [`RefCell`] purely to let `&mut Scheduler` borrows nest inside
//! ordinary function calls — the borrow is always released before any
//! call down into [`crate::arch`], since those calls may not return to
//! their caller for an arbitrarily long time (or, from the host's first
//! [`yield_now`], may not return until the whole regime has run its
//! course).

use std::cell::RefCell;
use std::ffi::c_void;

use crate::arch::{self, HostSp, RegSlots};
use crate::error::AllocError;
use crate::pool;
use crate::queue;
use crate::tcb::Tcb;

struct Scheduler {
    next_id: usize,
    pool_head: *mut Tcb,
    /// Head of the run queue. While the regime is active (`host_sp !=
    /// 0`) this is the *currently running* uthread, still linked into
    /// the ring like any other queued one; while the regime is not
    /// active it is simply the next uthread due to be dispatched. The
    /// running uthread is never unlinked until it yields (rotating the
    /// head) or retires (removed outright), so `queue_size` counting
    /// this ring always includes it.
    queue_head: *mut Tcb,
    /// Saved host stack pointer, or `0` when the host is not suspended
    /// inside a [`yield_now`] call (i.e. no uthread regime is active).
    host_sp: HostSp,
}

impl Scheduler {
    const fn new() -> Self {
        Scheduler {
            // Ids start at 1 so that 0 is unambiguously "no uthread",
            // the sentinel `this_id`/`this_run_count` return when
            // called from the host.
            next_id: 1,
            pool_head: std::ptr::null_mut(),
            queue_head: std::ptr::null_mut(),
            host_sp: 0,
        }
    }

    /// The currently running uthread, or null if control is on the
    /// host side.
    fn current(&self) -> *mut Tcb {
        if self.host_sp != 0 {
            self.queue_head
        } else {
            std::ptr::null_mut()
        }
    }
}

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::new());
}

fn with_scheduler<R>(f: impl FnOnce(&Scheduler) -> R) -> R {
    SCHEDULER.with(|cell| f(&cell.borrow()))
}

fn with_scheduler_mut<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    SCHEDULER.with(|cell| f(&mut cell.borrow_mut()))
}

/// What the next unsafe assembly call should do, computed entirely
/// under the scheduler borrow and executed only after it is released.
enum Action {
    /// Nothing runnable; the call that produced this returns immediately.
    Noop,
    LaunchFirst {
        arg: *mut c_void,
        stack_top: *mut u8,
        host_sp_slot: *mut HostSp,
    },
    SwitchUthread {
        next_regs: *const RegSlots,
        this_regs: *mut RegSlots,
    },
    BackupAndLaunch {
        arg: *mut c_void,
        stack_top: *mut u8,
        this_regs: *mut RegSlots,
    },
    RestoreUthread {
        next_regs: *const RegSlots,
    },
    LaunchUthread {
        arg: *mut c_void,
        stack_top: *mut u8,
    },
    RestoreHost {
        host_sp: HostSp,
    },
}

/// Run the trampoline `entry` on a uthread's own stack for the first
/// time, or resume one that has already run once; this is the only
/// place that reaches into [`arch`].
///
/// # Safety
///
/// Must only be called with an `Action` produced by this module, after
/// the scheduler borrow that built it has been released.
unsafe fn perform(action: Action) {
    match action {
        Action::Noop => {}
        Action::LaunchFirst {
            arg,
            stack_top,
            host_sp_slot,
        } => unsafe {
            arch::launch_first(arg, uthread_entry, stack_top, host_sp_slot);
        },
        Action::SwitchUthread {
            next_regs,
            this_regs,
        } => unsafe {
            arch::switch_uthread(next_regs, this_regs);
        },
        Action::BackupAndLaunch {
            arg,
            stack_top,
            this_regs,
        } => unsafe {
            arch::backup_and_launch(arg, uthread_entry, stack_top, this_regs);
        },
        Action::RestoreUthread { next_regs } => unsafe {
            arch::restore_uthread(next_regs);
        },
        Action::LaunchUthread { arg, stack_top } => unsafe {
            arch::launch_uthread(arg, uthread_entry, stack_top);
        },
        Action::RestoreHost { host_sp } => unsafe {
            arch::restore_host(&host_sp);
        },
    }
}

/// Entry trampoline every uthread's stack is launched into. Runs the
/// uthread's body exactly once, then retires it.
unsafe extern "C" fn uthread_entry(arg: *mut c_void) {
    let tcb = arg as *mut Tcb;
    let body = unsafe { (*tcb).body.take() };
    if let Some(body) = body {
        body();
    }
    let action = with_scheduler_mut(|s| retire(s, tcb));
    unsafe { perform(action) };
    unreachable!("retire() never returns an Action that comes back here");
}

/// Retire the uthread that just finished running its body: unlink it
/// from the run queue, return its TCB to the free pool, and hand off
/// to whatever runs next.
fn retire(s: &mut Scheduler, tcb: *mut Tcb) -> Action {
    let removed = unsafe { queue::remove_head(&mut s.queue_head) };
    debug_assert_eq!(removed, Some(tcb), "retire() always unlinks the running head");
    unsafe { pool::push(&mut s.pool_head, tcb) };
    if s.queue_head.is_null() {
        let host_sp = s.host_sp;
        s.host_sp = 0;
        Action::RestoreHost { host_sp }
    } else {
        unsafe { launch_or_restore(s.queue_head) }
    }
}

/// Build the action that starts or resumes `next`, from a context that
/// does not need its own registers saved (the caller is retiring or is
/// the host making its very first hand-off).
unsafe fn launch_or_restore(next: *mut Tcb) -> Action {
    unsafe {
        if (*next).run_cnt == 0 {
            (*next).run_cnt = 1;
            Action::LaunchUthread {
                arg: next as *mut c_void,
                stack_top: Tcb::stack_top(next),
            }
        } else {
            (*next).run_cnt += 1;
            Action::RestoreUthread {
                next_regs: std::ptr::addr_of!((*next).regs),
            }
        }
    }
}

/// Create a new uthread that will run `body` to completion, then
/// retire. The uthread is appended to the run queue; it does not start
/// running until some uthread (or the host) next calls [`yield_now`].
pub fn create<F>(body: F) -> Result<(), AllocError>
where
    F: FnOnce() + 'static,
{
    with_scheduler_mut(|s| {
        let tcb = match unsafe { pool::pop(&mut s.pool_head) } {
            Some(tcb) => tcb,
            None => {
                let id = s.next_id;
                let tcb = unsafe { Tcb::try_new(id) }?;
                s.next_id += 1;
                tcb
            }
        };
        unsafe {
            (*tcb).body = Some(Box::new(body));
            (*tcb).run_cnt = 0;
            queue::append(&mut s.queue_head, tcb);
        }
        Ok(())
    })
}

/// Allocate `n` TCBs directly into the free pool ahead of time, so that
/// later [`create`] calls can reuse them instead of allocating.
///
/// If allocation fails partway through, the TCBs already allocated stay
/// in the pool; there is no rollback.
pub fn preallocate(n: usize) -> Result<(), AllocError> {
    with_scheduler_mut(|s| {
        for _ in 0..n {
            let id = s.next_id;
            let tcb = unsafe { Tcb::try_new(id) }?;
            s.next_id += 1;
            unsafe { pool::push(&mut s.pool_head, tcb) };
        }
        Ok(())
    })
}

/// Free every TCB currently sitting in the pool, returning the number
/// freed. Uthreads still on the run queue or currently running are
/// untouched.
pub fn free_unused() -> usize {
    with_scheduler_mut(|s| {
        let n = unsafe { pool::len(s.pool_head) };
        unsafe { pool::drain(&mut s.pool_head) };
        n
    })
}

/// Number of TCBs currently held in the free pool.
pub fn pool_size() -> usize {
    with_scheduler(|s| unsafe { pool::len(s.pool_head) })
}

/// Number of uthreads currently queued, including the one presently
/// running (it stays linked into the run queue until it yields or
/// retires).
pub fn queue_size() -> usize {
    with_scheduler(|s| unsafe { queue::len(s.queue_head) })
}

/// Id of the currently running uthread, or `0` if called from the host
/// (outside any uthread).
pub fn this_id() -> usize {
    with_scheduler(|s| {
        let cur = s.current();
        if cur.is_null() {
            log::debug!("this_id() called outside any uthread");
            0
        } else {
            unsafe { (*cur).id }
        }
    })
}

/// Number of times the currently running uthread has been launched or
/// resumed, including the current run. `0` if called from the host.
pub fn this_run_count() -> usize {
    with_scheduler(|s| {
        let cur = s.current();
        if cur.is_null() {
            log::debug!("this_run_count() called outside any uthread");
            0
        } else {
            unsafe { (*cur).run_cnt }
        }
    })
}

/// Yield control to the next runnable uthread.
///
/// Called from the host, this enters the uthread regime: the host is
/// suspended and the run queue's head starts running. It returns to the
/// host only once every uthread has run to completion.
///
/// Called from within a uthread, this suspends the caller (which
/// rejoins the run queue) and resumes the next uthread in line, which
/// may be this same uthread if it is the only one runnable. It returns
/// once some other uthread (or the retirement path) switches back into
/// this one.
pub fn yield_now() {
    let action = with_scheduler_mut(|s| {
        if s.host_sp == 0 {
            // Entering the regime. Every TCB reachable from `queue_head`
            // here is one `create` appended and nothing has run yet, so
            // it is necessarily fresh (`run_cnt == 0`).
            if s.queue_head.is_null() {
                Action::Noop
            } else {
                let next = s.queue_head;
                unsafe { (*next).run_cnt = 1 };
                Action::LaunchFirst {
                    arg: next as *mut c_void,
                    stack_top: unsafe { Tcb::stack_top(next) },
                    host_sp_slot: std::ptr::addr_of_mut!(s.host_sp),
                }
            }
        } else {
            let this = s.queue_head;
            let next = unsafe { (*this).next };
            if next == this {
                // Sole runnable uthread: self-switch in place, nothing
                // to rotate.
                unsafe { (*this).run_cnt += 1 };
                Action::SwitchUthread {
                    next_regs: unsafe { std::ptr::addr_of!((*this).regs) },
                    this_regs: unsafe { std::ptr::addr_of_mut!((*this).regs) },
                }
            } else {
                // Rotate the ring head forward. `this` stays linked
                // exactly where it was, which is now the new tail
                // (`next.prev`) — no relinking needed, only the pointer
                // that names the head moves.
                s.queue_head = next;
                if unsafe { (*next).run_cnt } == 0 {
                    unsafe { (*next).run_cnt = 1 };
                    Action::BackupAndLaunch {
                        arg: next as *mut c_void,
                        stack_top: unsafe { Tcb::stack_top(next) },
                        this_regs: unsafe { std::ptr::addr_of_mut!((*this).regs) },
                    }
                } else {
                    unsafe { (*next).run_cnt += 1 };
                    Action::SwitchUthread {
                        next_regs: unsafe { std::ptr::addr_of!((*next).regs) },
                        this_regs: unsafe { std::ptr::addr_of_mut!((*this).regs) },
                    }
                }
            }
        }
    });
    unsafe { perform(action) };
}
