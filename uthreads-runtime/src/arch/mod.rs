//! Architecture-specific register files and the switch routine.

#[cfg(not(target_os = "linux"))]
compile_error!("uthreads only supports Linux");

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use self::x86_64::{uthreads_switch_context, Registers};

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use self::aarch64::{uthreads_switch_context, Registers};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("uthreads only supports x86_64 and aarch64");
