// SPDX-License-Identifier: MPL-2.0

//! The slice of the VFS the process core consumes: an open-file handle
//! trait and the per-process descriptor table.

mod file_table;

pub use file_table::{FileTable, FILE_TABLE_CAP};

use crate::prelude::*;

/// An open file as seen by the process core.
pub trait FileLike: Send + Sync {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize>;

    fn write_at(&self, _offset: usize, _buf: &[u8]) -> Result<usize> {
        return_errno_with_message!(Errno::EINVAL, "file is not writable");
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A reference to a VFS node, as consumed for a process's root and cwd.
/// The node tree itself is an external collaborator; only the identity is
/// carried here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    pub path: String,
}

impl NodeHandle {
    pub fn root() -> Self {
        Self {
            path: "/".to_string(),
        }
    }
}

/// A byte-buffer file, the in-tree stand-in for VFS-backed regular files.
pub struct MemFile {
    data: RwLock<Vec<u8>>,
}

impl MemFile {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: RwLock::new(data),
        })
    }
}

impl FileLike for MemFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let data = self.data.read();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        let mut data = self.data.write();
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn len(&self) -> usize {
        self.data.read().len()
    }
}
