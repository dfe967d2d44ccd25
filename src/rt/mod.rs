//! Kernel core
//!
//! Contains the kernel instance, scheduler, thread management, virtual
//! timers and the building blocks they share.

pub mod config;
pub mod critical;
pub mod cs_cell;
pub mod error;
pub mod kernel;
pub mod prio;
pub mod queue;
pub mod sched;
pub mod thread;
pub mod time;
pub mod types;
