//! Streaming mbox splitter.
//!
//! Reads line by line through a `BufRead`, never holding more than one
//! message in memory. Tolerant of mixed line endings, a UTF-8 BOM, and
//! `From ` lines without a preceding blank line.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::warn;

use crate::error::{Result, SearchError};
use crate::model::message::ByteSpan;

/// Size of the internal read buffer.
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// One message cut out of an mbox stream, `From ` line included.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub span: ByteSpan,
    pub bytes: Vec<u8>,
}

/// Iterator over the messages of an mbox stream.
pub struct MboxReader<R> {
    reader: R,
    offset: u64,
    pending: Option<(u64, Vec<u8>)>,
    prev_blank: bool,
    max_message_size: usize,
    done: bool,
}

impl MboxReader<BufReader<File>> {
    /// Open an mbox file for sequential reading.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SearchError::InvalidMbox(path.to_path_buf()),
            _ => SearchError::io(path, e),
        })?;
        Ok(Self::new(BufReader::with_capacity(READ_BUFFER_SIZE, file)))
    }
}

impl<R: BufRead> MboxReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            pending: None,
            prev_blank: true,
            max_message_size: 256 * 1024 * 1024,
            done: false,
        }
    }

    /// Truncate message bodies beyond this many bytes.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    fn finish(&mut self, end: u64) -> Option<RawMessage> {
        self.pending.take().map(|(start, bytes)| RawMessage {
            span: ByteSpan {
                offset: start,
                length: end - start,
            },
            bytes,
        })
    }
}

impl<R: BufRead> Iterator for MboxReader<R> {
    type Item = Result<RawMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut line = Vec::with_capacity(256);
        loop {
            line.clear();
            let read = match self.reader.read_until(b'\n', &mut line) {
                Ok(n) => n,
                Err(e) => {
                    self.done = true;
                    return Some(Err(SearchError::from(e)));
                }
            };
            if read == 0 {
                self.done = true;
                return self.finish(self.offset).map(Ok);
            }

            let line_start = self.offset;
            self.offset += read as u64;

            if is_separator(&line, line_start == 0) {
                if !self.prev_blank && line_start != 0 {
                    warn!(
                        offset = line_start,
                        "Found 'From ' separator without preceding blank line"
                    );
                }
                let finished = self.finish(line_start);
                self.pending = Some((line_start, line.clone()));
                self.prev_blank = false;
                if let Some(message) = finished {
                    return Some(Ok(message));
                }
                continue;
            }

            self.prev_blank = is_blank(&line);
            match self.pending.as_mut() {
                Some((_, buf)) if buf.len() + line.len() <= self.max_message_size => {
                    buf.extend_from_slice(&line);
                }
                Some((start, _)) => {
                    warn!(offset = *start, "Message exceeds maximum size, truncating");
                }
                None if line_start == 0 => {
                    self.done = true;
                    return Some(Err(SearchError::Mime(
                        "stream does not start with a 'From ' line".into(),
                    )));
                }
                None => {}
            }
        }
    }
}

/// Read one message back from an mbox file by its span.
pub fn read_span(path: &Path, span: ByteSpan) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_err(|e| SearchError::io(path, e))?;
    file.seek(SeekFrom::Start(span.offset))
        .map_err(|e| SearchError::io(path, e))?;
    let mut buf = vec![0u8; span.length as usize];
    file.read_exact(&mut buf)
        .map_err(|e| SearchError::io(path, e))?;
    Ok(buf)
}

/// `From ` at the start of a line; a BOM is allowed on the very first line.
fn is_separator(line: &[u8], first: bool) -> bool {
    let line = match line.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        Some(rest) if first => rest,
        _ => line,
    };
    line.starts_with(b"From ")
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| matches!(b, b'\n' | b'\r' | b' ' | b'\t'))
}
