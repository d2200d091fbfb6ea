// SPDX-License-Identifier: MPL-2.0

/// Error number.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Errno {
    EPERM = 1,    /* Operation not permitted */
    ENOENT = 2,   /* No such file or directory */
    ESRCH = 3,    /* No such process */
    EINTR = 4,    /* Interrupted system call */
    EIO = 5,      /* I/O error */
    ENXIO = 6,    /* No such device or address */
    E2BIG = 7,    /* Argument list too long */
    ENOEXEC = 8,  /* Exec format error */
    EBADF = 9,    /* Bad file number */
    ECHILD = 10,  /* No child processes */
    EAGAIN = 11,  /* Try again */
    ENOMEM = 12,  /* Out of memory */
    EACCES = 13,  /* Permission denied */
    EFAULT = 14,  /* Bad address */
    EBUSY = 16,   /* Device or resource busy */
    EEXIST = 17,  /* File exists */
    EXDEV = 18,   /* Cross-device link */
    ENODEV = 19,  /* No such device */
    EINVAL = 22,  /* Invalid argument */
    ENFILE = 23,  /* File table overflow */
    EMFILE = 24,  /* Too many open files */
    ESPIPE = 29,  /* Illegal seek */
    ERANGE = 34,  /* Math result not representable */
    ENAMETOOLONG = 36, /* File name too long */
    ENOSYS = 38,  /* Invalid system call number */
    ETIMEDOUT = 110, /* Connection timed out */
}

/// The error type used across this crate.
#[derive(Debug, Clone, Copy)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(errno: Errno) -> Self {
        Error { errno, msg: None }
    }

    pub const fn with_message(errno: Errno, msg: &'static str) -> Self {
        Error {
            errno,
            msg: Some(msg),
        }
    }

    pub const fn error(&self) -> Errno {
        self.errno
    }

    pub const fn message(&self) -> Option<&'static str> {
        self.msg
    }

    /// The value a syscall boundary stores in the trapframe on failure.
    pub const fn as_neg_errno(&self) -> isize {
        -(self.errno as i32 as isize)
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl From<vesper_virtio::device::VirtioDeviceError> for Error {
    fn from(err: vesper_virtio::device::VirtioDeviceError) -> Self {
        use vesper_virtio::device::VirtioDeviceError;
        match err {
            VirtioDeviceError::IoError => Error::with_message(Errno::EIO, "device I/O failure"),
            VirtioDeviceError::DeviceBusy => {
                Error::with_message(Errno::EBUSY, "device request ring is full")
            }
            VirtioDeviceError::NoDevice => Error::with_message(Errno::ENODEV, "no such device"),
            _ => Error::with_message(Errno::EINVAL, "device setup failure"),
        }
    }
}

impl From<alloc::ffi::NulError> for Error {
    fn from(_: alloc::ffi::NulError) -> Self {
        Error::with_message(Errno::EINVAL, "unexpected nul byte in string")
    }
}

impl From<core::str::Utf8Error> for Error {
    fn from(_: core::str::Utf8Error) -> Self {
        Error::with_message(Errno::EINVAL, "invalid utf-8 string")
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[macro_export]
macro_rules! return_errno {
    ($errno: expr) => {
        return Err($crate::error::Error::new($errno))
    };
}

#[macro_export]
macro_rules! return_errno_with_message {
    ($errno: expr, $message: expr) => {
        return Err($crate::error::Error::with_message($errno, $message))
    };
}
