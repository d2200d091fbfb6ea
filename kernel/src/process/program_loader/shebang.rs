// SPDX-License-Identifier: MPL-2.0

use crate::{fs::FileLike, prelude::*};

/// The first line of a script may name one interpreter and at most one
/// argument, each bounded to 256 bytes.
const SHEBANG_LINE_MAX: usize = 256;

#[derive(Debug, PartialEq, Eq)]
pub struct Shebang {
    pub interpreter: String,
    pub argument: Option<String>,
}

/// Parses a `#!` header line.
///
/// The whole line must fit in 256 bytes; a longer or unterminated line is
/// not executable.
pub fn parse_shebang(file: &Arc<dyn FileLike>) -> Result<Shebang> {
    let mut line = [0u8; SHEBANG_LINE_MAX];
    let n = file.read_at(0, &mut line)?;
    let line = &line[..n];
    if line.len() < 2 || &line[..2] != b"#!" {
        return_errno_with_message!(Errno::ENOEXEC, "missing shebang magic");
    }
    let Some(nl) = line.iter().position(|&b| b == b'\n') else {
        return_errno_with_message!(Errno::ENOEXEC, "unterminated interpreter line");
    };
    let line = &line[2..nl];

    let mut words = line
        .split(|b| (*b as char).is_ascii_whitespace())
        .filter(|w| !w.is_empty());
    let Some(interpreter) = words.next() else {
        return_errno_with_message!(Errno::ENOEXEC, "empty interpreter line");
    };
    let argument = words.next();

    Ok(Shebang {
        interpreter: core::str::from_utf8(interpreter)?.to_string(),
        argument: argument
            .map(|a| core::str::from_utf8(a).map(|a| a.to_string()))
            .transpose()?,
    })
}
