use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

/// Result of one capped read pass over a file.
#[derive(Debug)]
pub(crate) struct ReadOutcome {
    /// Record contents, trailing newline (and carriage return) stripped.
    pub lines: Vec<String>,
    /// Bytes consumed, newlines included.
    pub bytes_read: u64,
    /// Offset the pass actually started from. Differs from the requested
    /// offset only when the file shrank below it (truncation/rotation),
    /// in which case reading restarts from the beginning.
    pub start_offset: u64,
    /// True when the file shrank below the requested offset.
    pub truncated: bool,
    /// True when the pass stopped at end of data rather than at the cap.
    pub eof: bool,
}

/// Read up to `max_records` newline-terminated records from `offset`.
///
/// The file is opened per read; a trailing partial line (no newline yet) is
/// left unread so the next pass picks it up once the writer completes it.
pub(crate) fn read_from_offset(
    path: &Path,
    offset: u64,
    max_records: usize,
) -> io::Result<ReadOutcome> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();

    let (start_offset, truncated) = if size < offset {
        (0, true)
    } else {
        (offset, false)
    };

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(start_offset))?;

    let mut lines = Vec::new();
    let mut bytes_read: u64 = 0;
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut eof = true;

    while lines.len() < max_records {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        if buf.last() != Some(&b'\n') {
            // Partial line at EOF; leave it for the next pass.
            break;
        }

        bytes_read += n as u64;
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches('\n')
            .trim_end_matches('\r')
            .to_string();
        lines.push(line);

        if lines.len() == max_records {
            eof = false;
        }
    }

    Ok(ReadOutcome {
        lines,
        bytes_read,
        start_offset,
        truncated,
        eof,
    })
}
