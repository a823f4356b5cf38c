//! Debug tracing switches
//!
//! The kernel logs through the `log` facade. These macros add high-volume
//! trace lines that only exist when their cargo feature is enabled, so the
//! default build carries no formatting code for them.

/// Scheduler trace, enabled by the `debug-scheduler` feature
#[macro_export]
macro_rules! sched_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "debug-scheduler")]
        {
            log::trace!(target: "keel::sched", $($arg)*);
        }
    };
}

/// System-call trace, enabled by the `debug-syscall` feature
#[macro_export]
macro_rules! syscall_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "debug-syscall")]
        {
            log::trace!(target: "keel::syscall", $($arg)*);
        }
    };
}
