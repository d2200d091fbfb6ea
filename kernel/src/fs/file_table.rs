// SPDX-License-Identifier: MPL-2.0

use super::FileLike;
use crate::prelude::*;

/// Hard cap on descriptor numbers.
pub const FILE_TABLE_CAP: usize = 1024;

#[derive(Clone, Default)]
struct FileDesc {
    file: Option<Arc<dyn FileLike>>,
    cloexec: bool,
}

/// The per-process open-file table: a grow-on-demand array of
/// `{file, cloexec}` slots indexed by descriptor number.
#[derive(Default)]
pub struct FileTable {
    slots: Vec<FileDesc>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `file` at the lowest free descriptor.
    pub fn alloc_fd(&mut self, file: Arc<dyn FileLike>, cloexec: bool) -> Result<usize> {
        let fd = match self.slots.iter().position(|d| d.file.is_none()) {
            Some(fd) => fd,
            None => {
                if self.slots.len() >= FILE_TABLE_CAP {
                    return_errno_with_message!(Errno::EMFILE, "file table is full");
                }
                self.slots.push(FileDesc::default());
                self.slots.len() - 1
            }
        };
        self.slots[fd] = FileDesc {
            file: Some(file),
            cloexec,
        };
        Ok(fd)
    }

    pub fn get(&self, fd: usize) -> Result<Arc<dyn FileLike>> {
        self.slots
            .get(fd)
            .and_then(|d| d.file.clone())
            .ok_or_else(|| Error::with_message(Errno::EBADF, "no such file descriptor"))
    }

    pub fn set_cloexec(&mut self, fd: usize, cloexec: bool) -> Result<()> {
        let desc = self
            .slots
            .get_mut(fd)
            .filter(|d| d.file.is_some())
            .ok_or_else(|| Error::with_message(Errno::EBADF, "no such file descriptor"))?;
        desc.cloexec = cloexec;
        Ok(())
    }

    /// Releases a descriptor, handing the file back so the caller can drop
    /// it outside the table lock.
    pub fn close(&mut self, fd: usize) -> Result<Arc<dyn FileLike>> {
        let desc = self
            .slots
            .get_mut(fd)
            .ok_or_else(|| Error::with_message(Errno::EBADF, "no such file descriptor"))?;
        desc.file
            .take()
            .ok_or_else(|| Error::with_message(Errno::EBADF, "descriptor already closed"))
    }

    /// Exec-time sweep of every close-on-exec descriptor.
    pub fn close_cloexec(&mut self) -> Vec<Arc<dyn FileLike>> {
        let mut closed = Vec::new();
        for desc in self.slots.iter_mut() {
            if desc.cloexec {
                if let Some(file) = desc.file.take() {
                    closed.push(file);
                }
            }
        }
        closed
    }

    /// Exit-time sweep of the whole table.
    pub fn close_all(&mut self) -> Vec<Arc<dyn FileLike>> {
        self.slots
            .iter_mut()
            .filter_map(|desc| desc.file.take())
            .collect()
    }

    /// Duplicates the table, bumping each open file's refcount.
    pub fn duplicate(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|d| d.file.is_some()).count()
    }
}
