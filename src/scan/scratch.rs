//! Flashback scratch file.
//!
//! Undo statements are spooled to disk in forward order and read back
//! in reverse. The file lives exactly as long as its [`ScratchFile`] value.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Highest uniqueness suffix tried before giving up
const MAX_VERSIONS: usize = 1000;

/// Uniquely named temporary file, removed on drop
pub struct ScratchFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    lines: usize,
}

impl ScratchFile {
    /// Create `dir/base`, or `dir/base.N` for the first free N below 1000
    pub fn create(dir: &Path, base: &str) -> io::Result<Self> {
        let candidates = std::iter::once(base.to_string())
            .chain((0..MAX_VERSIONS).map(|version| format!("{}.{}", base, version)));

        for name in candidates {
            let path = dir.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    tracing::debug!("Created scratch file {}", path.display());
                    return Ok(Self {
                        path,
                        writer: Some(BufWriter::new(file)),
                        lines: 0,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!(
                "cannot create unique file {}.[0-{}]",
                dir.join(base).display(),
                MAX_VERSIONS
            ),
        ))
    }

    /// Append one statement as one line
    pub fn append(&mut self, statement: &str) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "scratch file already finished")
        })?;
        writer.write_all(encode_line(statement).as_bytes())?;
        writer.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    /// Flush and close the write handle; the file stays until drop
    pub fn finish(&mut self) -> io::Result<&Path> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(&self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of statements written
    pub fn len(&self) -> usize {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        drop(self.writer.take());
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed scratch file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove scratch file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Keep a statement on one line.
///
/// Literals only carry raw newlines when the server runs with
/// `NO_BACKSLASH_ESCAPES`; those and backslashes are escaped here.
pub fn encode_line(statement: &str) -> String {
    if !statement.contains(&['\\', '\n', '\r'][..]) {
        return statement.to_string();
    }
    let mut out = String::with_capacity(statement.len() + 8);
    for c in statement.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`encode_line`]
pub fn decode_line(line: &str) -> String {
    if !line.contains('\\') {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
