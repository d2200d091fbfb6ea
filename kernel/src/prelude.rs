// SPDX-License-Identifier: MPL-2.0

//! The prelude imported by (nearly) every file of this crate.

pub(crate) use alloc::{
    boxed::Box,
    collections::BTreeMap,
    string::{String, ToString},
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};
pub(crate) use core::time::Duration;

pub(crate) use log::{debug, warn};
pub(crate) use spin::{Mutex, MutexGuard, RwLock};

pub(crate) use crate::{
    error::{Errno, Error, Result},
    sync::SpinLock,
    vm::Vaddr,
};

/// The machine page size assumed by the user-memory contract.
pub const PAGE_SIZE: usize = 4096;
