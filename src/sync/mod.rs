//! Synchronization primitives
//!
//! Semaphores, mutexes, condition variables, event flags and synchronous
//! messages. Objects live in kernel pools and are used through small copy
//! handles.

#[cfg(feature = "sem")]
pub mod sem;

#[cfg(feature = "mutex")]
pub mod mutex;

#[cfg(feature = "condvar")]
pub mod condvar;

#[cfg(feature = "events")]
pub mod event;

#[cfg(feature = "messages")]
pub mod msg;
