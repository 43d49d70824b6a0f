//! Incremental tail over a growing log file.
//!
//! The `/stream` endpoint polls a debug log on a fixed interval and forwards
//! every newly appended line as one SSE frame. `Tail` keeps the read offset
//! between polls and only ever reads the delta since the last one.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Stateful reader over a single file, advancing a byte offset.
pub struct Tail {
    path: PathBuf,
    file: File,
    offset: u64,
}

impl Tail {
    /// Open the file for tailing, creating it empty when absent so a client
    /// can attach before the processor has written anything.
    pub async fn open(path: &Path) -> io::Result<Self> {
        if fs::metadata(path).await.is_err() {
            fs::write(path, b"").await?;
        }
        let file = File::open(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            offset: 0,
        })
    }

    /// Read everything appended since the last call and split it into
    /// segments. Returns an empty vec when the file has not grown. Errors
    /// (the file may have been removed by the retention cleaner) are left to
    /// the caller to treat as non-fatal.
    pub async fn next_segments(&mut self) -> io::Result<Vec<String>> {
        let size = fs::metadata(&self.path).await?.len();
        if size <= self.offset {
            return Ok(Vec::new());
        }

        self.file.seek(io::SeekFrom::Start(self.offset)).await?;
        let mut delta = Vec::new();
        self.file.read_to_end(&mut delta).await?;
        self.offset += delta.len() as u64;

        Ok(split_segments(&String::from_utf8_lossy(&delta)))
    }
}

/// Split a read delta into one segment per line.
///
/// `\n`, `\r\n` and a bare `\r` (conversion tools redraw progress lines with
/// it) all terminate a segment, so segments never carry line-ending bytes —
/// SSE data frames must not contain them. A trailing run of bytes without a
/// terminator is one final segment; a delta ending exactly at a terminator
/// produces no trailing empty segment.
pub fn split_segments(delta: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = delta.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\n' => segments.push(std::mem::take(&mut current)),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn split_empty_delta() {
        assert!(split_segments("").is_empty());
    }

    #[test]
    fn split_complete_lines() {
        assert_eq!(split_segments("step1\nstep2\n"), vec!["step1", "step2"]);
    }

    #[test]
    fn split_keeps_interior_empty_lines() {
        assert_eq!(split_segments("a\n\nb\n"), vec!["a", "", "b"]);
    }

    #[test]
    fn split_trailing_newline_adds_no_empty_segment() {
        assert_eq!(split_segments("done\n"), vec!["done"]);
    }

    #[test]
    fn split_partial_line_is_one_segment() {
        assert_eq!(split_segments("partial"), vec!["partial"]);
        assert_eq!(split_segments("a\npartial"), vec!["a", "partial"]);
    }

    #[test]
    fn split_crlf_is_one_terminator() {
        assert_eq!(split_segments("progress 50%\r\n"), vec!["progress 50%"]);
        assert_eq!(split_segments("a\r\nb\n"), vec!["a", "b"]);
    }

    #[test]
    fn split_bare_carriage_return_terminates_a_segment() {
        assert_eq!(
            split_segments("progress 50%\rprogress 100%\n"),
            vec!["progress 50%", "progress 100%"]
        );
    }

    #[test]
    fn segments_never_contain_line_ending_bytes() {
        for segment in split_segments("a\r\nb\rc\npartial\r") {
            assert!(!segment.contains('\r') && !segment.contains('\n'));
        }
    }

    #[tokio::test]
    async fn open_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.debug.txt");

        let mut tail = Tail::open(&path).await.unwrap();
        assert!(path.exists());
        assert!(tail.next_segments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tail_reads_appended_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.debug.txt");
        std::fs::write(&path, "").unwrap();

        let mut tail = Tail::open(&path).await.unwrap();

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        writeln!(file, "step1").unwrap();
        assert_eq!(tail.next_segments().await.unwrap(), vec!["step1"]);

        writeln!(file, "step2").unwrap();
        assert_eq!(tail.next_segments().await.unwrap(), vec!["step2"]);

        // No growth, no segments.
        assert!(tail.next_segments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tail_strips_crlf_line_endings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.debug.txt");
        std::fs::write(&path, "").unwrap();

        let mut tail = Tail::open(&path).await.unwrap();

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        write!(file, "progress 50%\r\n").unwrap();

        let segments = tail.next_segments().await.unwrap();
        assert_eq!(segments, vec!["progress 50%"]);
    }

    #[tokio::test]
    async fn tail_emits_partial_write_as_final_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.debug.txt");
        std::fs::write(&path, "").unwrap();

        let mut tail = Tail::open(&path).await.unwrap();

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        write!(file, "step1\npar").unwrap();
        assert_eq!(tail.next_segments().await.unwrap(), vec!["step1", "par"]);

        write!(file, "tial\n").unwrap();
        assert_eq!(tail.next_segments().await.unwrap(), vec!["tial"]);
    }
}
