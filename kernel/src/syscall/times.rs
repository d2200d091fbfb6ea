// SPDX-License-Identifier: MPL-2.0

use bytemuck_derive::{Pod, Zeroable};
use core::sync::atomic::Ordering;

use crate::{prelude::*, thread::Thread, time};

/// Clock ticks per second reported through `times`.
pub const USER_HZ: u64 = 100;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
pub struct CTms {
    pub tms_utime: i64,
    pub tms_stime: i64,
    pub tms_cutime: i64,
    pub tms_cstime: i64,
}

fn ns_to_ticks(ns: u64) -> i64 {
    (ns / (1_000_000_000 / USER_HZ)) as i64
}

pub fn sys_times(thread: &Arc<Thread>, tms_addr: Vaddr) -> Result<isize> {
    let process = thread.process();
    let tms = CTms {
        tms_utime: ns_to_ticks(process.stats.utime_ns.load(Ordering::Relaxed)),
        tms_stime: ns_to_ticks(process.stats.stime_ns.load(Ordering::Relaxed)),
        tms_cutime: 0,
        tms_cstime: 0,
    };
    if tms_addr != 0 {
        process.vm().write_val(tms_addr, &tms)?;
    }
    Ok(ns_to_ticks(time::now().as_nanos() as u64) as isize)
}
