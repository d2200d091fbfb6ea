// SPDX-License-Identifier: MPL-2.0

use crate::{
    prelude::*,
    process::{is_init_process, signal, table, Process},
    thread::Thread,
};

pub fn sys_kill(thread: &Arc<Thread>, pid: i32, signum: u32) -> Result<isize> {
    let process = thread.process();
    // signum 0 probes for existence without posting anything.
    let signum = if signum == 0 {
        None
    } else {
        Some(signal::sig_num::SigNum::try_from(signum as u8)?)
    };

    let targets: Vec<Arc<Process>> = match pid {
        p if p > 0 => {
            let target = table::get_process(p as u32)
                .ok_or_else(|| Error::with_message(Errno::ESRCH, "no such process"))?;
            vec![target]
        }
        0 => {
            let group = process
                .process_group()
                .ok_or_else(|| Error::new(Errno::ESRCH))?;
            group_members(&group)
        }
        -1 => table::all_processes()
            .into_iter()
            .filter(|p| !is_init_process(p) && p.pid() != process.pid())
            .collect(),
        p => {
            let group = table::get_process_group((-p) as u32)
                .ok_or_else(|| Error::with_message(Errno::ESRCH, "no such process group"))?;
            group_members(&group)
        }
    };

    let sender = process.credentials();
    let mut delivered = false;
    for target in targets {
        if !sender.may_signal(&target.credentials()) {
            continue;
        }
        delivered = true;
        if let Some(signum) = signum {
            signal::proc_signal(&target, signum)?;
        }
    }
    if !delivered {
        return_errno_with_message!(Errno::EPERM, "no signalable target");
    }
    Ok(0)
}

// Snapshot through the global table so no group lock is held while
// posting.
fn group_members(group: &Arc<crate::process::ProcessGroup>) -> Vec<Arc<Process>> {
    table::all_processes()
        .into_iter()
        .filter(|p| group.contains_process(p.pid()))
        .collect()
}
