//! Reverse Emitter
//!
//! Reads a newline-delimited file from its end back to its start, one line at
//! a time. Only one block plus the line being assembled are held in memory.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Bytes read per step
pub const BLOCK_SIZE: usize = 4096;

/// Lines of a file in reverse order.
///
/// Follows `str::lines` conventions: a single trailing newline does not
/// produce an empty last line, and an empty file yields nothing.
pub struct ReverseLines<R> {
    reader: R,
    block: Vec<u8>,
    /// Unscanned prefix of `block` is `block[..cursor]`
    cursor: usize,
    /// File bytes not yet read, all before the current block
    remaining: u64,
    /// Tail of the line being assembled, as chunks in reverse file order
    carry: Vec<Vec<u8>>,
    first_line: bool,
    empty: bool,
    done: bool,
}

impl ReverseLines<File> {
    /// Open a file for reverse reading
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> ReverseLines<R> {
    pub fn new(reader: R) -> io::Result<Self> {
        Self::with_block_size(reader, BLOCK_SIZE)
    }

    pub fn with_block_size(mut reader: R, block_size: usize) -> io::Result<Self> {
        if block_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "block size must be positive",
            ));
        }
        let size = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader,
            block: vec![0; block_size],
            cursor: 0,
            remaining: size,
            carry: Vec::new(),
            first_line: true,
            empty: size == 0,
            done: false,
        })
    }

    /// Load the block just before the one already scanned
    fn read_block(&mut self) -> io::Result<()> {
        let len = self.remaining.min(self.block.len() as u64);
        let start = self.remaining - len;
        // len <= block.len(), which is a usize
        let len = len as usize;
        self.reader.seek(SeekFrom::Start(start))?;
        self.reader.read_exact(&mut self.block[..len])?;
        self.remaining = start;
        self.cursor = len;
        Ok(())
    }

    fn take_line(&mut self, head: &[u8]) -> String {
        let mut line = Vec::with_capacity(head.len() + self.carry.iter().map(Vec::len).sum::<usize>());
        line.extend_from_slice(head);
        for chunk in self.carry.drain(..).rev() {
            line.extend_from_slice(&chunk);
        }
        String::from_utf8_lossy(&line).into_owned()
    }

    fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let scanned = &self.block[..self.cursor];
            if let Some(newline) = scanned.iter().rposition(|&b| b == b'\n') {
                let head = self.block[newline + 1..self.cursor].to_vec();
                self.cursor = newline;
                let line = self.take_line(&head);

                let trailing = std::mem::replace(&mut self.first_line, false);
                if trailing && line.is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }

            if self.cursor > 0 {
                self.carry.push(self.block[..self.cursor].to_vec());
                self.cursor = 0;
            }

            if self.remaining == 0 {
                self.done = true;
                if self.empty {
                    return Ok(None);
                }
                return Ok(Some(self.take_line(&[])));
            }

            self.read_block()?;
        }
    }
}

impl<R: Read + Seek> Iterator for ReverseLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_line() {
            Ok(line) => line.map(Ok),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn reversed(content: &str, block_size: usize) -> Vec<String> {
        ReverseLines::with_block_size(Cursor::new(content.as_bytes().to_vec()), block_size)
            .unwrap()
            .collect::<io::Result<Vec<_>>>()
            .unwrap()
    }

    fn expected(content: &str) -> Vec<String> {
        content.lines().rev().map(str::to_string).collect()
    }

    #[test]
    fn test_small_inputs() {
        for content in ["", "\n", "a", "a\n", "a\nb", "a\nb\n", "a\n\n", "\n\nx\n", "one\ntwo\nthree\n"] {
            for block_size in [1, 2, 3, 4096] {
                assert_eq!(
                    reversed(content, block_size),
                    expected(content),
                    "content {:?} block size {}",
                    content,
                    block_size
                );
            }
        }
    }

    #[test]
    fn test_multibyte_across_block_boundaries() {
        let content = "héllo wörld\n日本語のテキスト\n🦀🦀🦀\nplain\nÅngström ü\n";
        // every block size splits some multi-byte sequence
        for block_size in 1..=17 {
            assert_eq!(reversed(content, block_size), expected(content));
        }
    }

    #[test]
    fn test_file_sizes_around_block_size() {
        let line = "INSERT INTO `db`.`t`(`id`) VALUES (1);";
        let equal = format!("{}\n", line);
        let block_size = equal.len();

        let smaller = format!("{}\n", &line[..20]);
        let larger: String = (0..500).map(|i| format!("{} -- {}\n", line, i)).collect();
        assert!(larger.len() > 100 * block_size);

        for content in [&smaller, &equal, &larger] {
            assert_eq!(reversed(content, block_size), expected(content));
        }
    }

    #[test]
    fn test_many_blocks_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut lines = Vec::new();
        for i in 0..5000 {
            let line = format!("DELETE FROM `s`.`t` WHERE `id`={} AND `name`='ñ{}' LIMIT 1;", i, i);
            writeln!(file, "{}", line).unwrap();
            lines.push(line);
        }
        file.flush().unwrap();

        let mut emitted: Vec<String> = ReverseLines::open(file.path())
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        emitted.reverse();
        assert_eq!(emitted, lines);
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let err = ReverseLines::with_block_size(Cursor::new(Vec::new()), 0).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
