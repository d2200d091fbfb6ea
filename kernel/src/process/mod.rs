// SPDX-License-Identifier: MPL-2.0

//! Sessions, process groups, processes and their lifecycles.

pub mod clone;
pub mod credentials;
pub mod exit;
pub mod futex;
mod group;
#[allow(clippy::module_inception)]
mod process;
pub mod program_loader;
pub mod ptrace;
pub mod rlimit;
mod session;
pub mod signal;
pub mod status;
pub mod stop;
pub mod table;
pub mod vfork;
pub mod wait;

pub use clone::{uproc_clone, uthread_clone, CloneFlags};
pub use credentials::Credentials;
pub use exit::{proc_exit, thread_exit};
pub use group::ProcessGroup;
pub use process::{
    is_init_process, kproc_create, set_init_process, uproc_create_elf, Process, ProcessStats,
};
pub(crate) use process::unlink_process;
pub use program_loader::uproc_execve;
pub use session::Session;
pub use status::ProcessState;
pub use stop::{proc_cont, proc_stop};
pub use wait::{wait4, ProcessFilter, WaitOptions};

/// Process id.
pub type Pid = u32;
/// Process group id.
pub type Pgid = u32;
/// Session id.
pub type Sid = u32;

#[cfg(test)]
pub(crate) use process::test_util;

#[cfg(test)]
mod scenario_tests;
