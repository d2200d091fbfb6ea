// SPDX-License-Identifier: MPL-2.0

use bitflags::bitflags;

use super::{constants::*, sig_mask::SigSet, sig_num::SigNum};

/// The disposition of one signal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SigAction {
    #[default]
    Dfl, // Default action
    Ign, // Ignore this signal
    User {
        // User-given handler
        handler_addr: usize,
        flags: SigActionFlags,
        restorer_addr: usize,
        mask: SigSet,
    },
}

bitflags! {
    pub struct SigActionFlags: u32 {
        const SA_NOCLDSTOP  = 1;
        const SA_NOCLDWAIT  = 2;
        const SA_SIGINFO    = 4;
        const SA_ONSTACK    = 0x08000000;
        const SA_RESTART    = 0x10000000;
        const SA_NODEFER    = 0x40000000;
        const SA_RESETHAND  = 0x80000000;
        const SA_RESTORER   = 0x04000000;
    }
}

/// The default action applied when the disposition is `Dfl`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SigDefaultAction {
    Term, // Terminate the process.
    Ign,  // Ignore the signal.
    Core, // Terminate the process and dump core.
    Stop, // Stop the process.
    Cont, // Continue the process if it is currently stopped.
}

impl SigDefaultAction {
    pub fn from_signum(num: SigNum) -> SigDefaultAction {
        match num {
            SIGABRT | // = SIGIOT
            SIGBUS  |
            SIGFPE  |
            SIGILL  |
            SIGQUIT |
            SIGSEGV |
            SIGTRAP |
            SIGXCPU |
            SIGXFSZ
                => SigDefaultAction::Core,
            SIGCHLD |
            SIGURG  |
            SIGWINCH
                => SigDefaultAction::Ign,
            SIGCONT
                => SigDefaultAction::Cont,
            SIGSTOP |
            SIGTSTP |
            SIGTTIN |
            SIGTTOU
                => SigDefaultAction::Stop,
            _
                => SigDefaultAction::Term,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_actions_follow_posix_table() {
        assert_eq!(SigDefaultAction::from_signum(SIGHUP), SigDefaultAction::Term);
        assert_eq!(SigDefaultAction::from_signum(SIGPOLL), SigDefaultAction::Term);
        assert_eq!(SigDefaultAction::from_signum(SIGSEGV), SigDefaultAction::Core);
        assert_eq!(SigDefaultAction::from_signum(SIGCHLD), SigDefaultAction::Ign);
        assert_eq!(SigDefaultAction::from_signum(SIGCONT), SigDefaultAction::Cont);
        assert_eq!(SigDefaultAction::from_signum(SIGTSTP), SigDefaultAction::Stop);
    }
}
