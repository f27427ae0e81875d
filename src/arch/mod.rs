//! Architecture-specific context-switch primitives (component C1).
//!
//! Every operation here is an unsafe leaf, written once per target
//! architecture, that manipulates callee-saved registers and the stack
//! pointer directly. The scheduler above this module never touches a
//! register or a raw stack pointer itself; it only ever passes opaque
//! [`RegSlots`] save areas and [`HostSp`] values between these functions.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use self::x86_64::*;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use self::aarch64::*;
    } else {
        compile_error!("uthreads supports only x86_64 and aarch64");
    }
}
