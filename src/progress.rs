//! Progress log: an append-only text file per workflow run.
//!
//! Every append is flushed before returning so a concurrent reader polling
//! the file sees each step as soon as it happens.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Horizontal rule framing the header and footer of a run.
pub const RULE_WIDTH: usize = 100;

/// Every run log ends with exactly one line starting with this prefix.
pub const TERMINAL_PREFIX: &str = "=== run ";

/// Returned by the log endpoint when a run has never been started.
pub const NO_LOG_PLACEHOLDER: &str = "No log yet.";

pub fn rule() -> String {
    "-".repeat(RULE_WIDTH)
}

/// Writer half of a run's progress log.
pub struct ProgressLog {
    file: File,
}

impl ProgressLog {
    /// Create (or truncate) the log at `path`.
    pub async fn create(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let file = File::create(path.into()).await?;
        Ok(Self { file })
    }

    /// Reopen the log at `path` for appending, creating it if missing.
    pub async fn open_append(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.into())
            .await?;
        Ok(Self { file })
    }

    /// Append `text` followed by a newline and flush.
    ///
    /// Lines of `text` that would read as a terminal marker are indented;
    /// only [`ProgressLog::finish`] writes one.
    pub async fn append(&mut self, text: &str) -> std::io::Result<()> {
        self.write_line(&neutralize_markers(text)).await
    }

    /// Append the terminal marker for this run.
    pub async fn finish(&mut self, status: &str) -> std::io::Result<()> {
        let status = status.replace(['\r', '\n'], " ");
        self.write_line(&format!("{}{} ===", TERMINAL_PREFIX, status))
            .await
    }

    async fn write_line(&mut self, text: &str) -> std::io::Result<()> {
        self.file.write_all(text.as_bytes()).await?;
        if !text.ends_with('\n') {
            self.file.write_all(b"\n").await?;
        }
        self.file.flush().await?;
        self.file.sync_data().await
    }
}

/// Indent every line of `text` that starts with [`TERMINAL_PREFIX`].
/// A line starts at the beginning of `text` or after `\n` or `\r`.
fn neutralize_markers(text: &str) -> Cow<'_, str> {
    let is_marker_at = |i: usize| text[i..].starts_with(TERMINAL_PREFIX);
    let line_starts = std::iter::once(0).chain(
        text.char_indices()
            .filter(|(_, c)| *c == '\n' || *c == '\r')
            .map(|(i, _)| i + 1),
    );
    let markers: Vec<usize> = line_starts.filter(|&i| is_marker_at(i)).collect();
    if markers.is_empty() {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + markers.len());
    let mut last = 0;
    for i in markers {
        out.push_str(&text[last..i]);
        out.push(' ');
        last = i;
    }
    out.push_str(&text[last..]);
    Cow::Owned(out)
}

/// Read the whole log, or `None` if it was never created.
pub async fn read_all(path: &Path) -> std::io::Result<Option<String>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Whether `log` already carries a terminal marker line.
pub fn is_terminated(log: &str) -> bool {
    log.lines().any(|line| line.starts_with(TERMINAL_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_are_visible_to_readers_immediately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.log");
        let mut log = ProgressLog::create(&path).await.expect("create");

        log.append("first").await.expect("append");
        let after_first = read_all(&path).await.expect("read").expect("exists");
        assert_eq!(after_first, "first\n");

        log.append("second\n").await.expect("append");
        let after_second = read_all(&path).await.expect("read").expect("exists");
        assert_eq!(after_second, "first\nsecond\n");
        assert!(!is_terminated(&after_second));

        log.finish("completed").await.expect("finish");
        let done = read_all(&path).await.expect("read").expect("exists");
        assert!(done.ends_with("=== run completed ===\n"));
        assert!(is_terminated(&done));
    }

    #[tokio::test]
    async fn only_finish_writes_a_marker_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.log");
        let mut log = ProgressLog::create(&path).await.expect("create");

        log.append("=== run completed ===").await.expect("append");
        log.append("Products found: Widget\n=== run completed ===\r=== run failed: x ===")
            .await
            .expect("append");
        let partial = read_all(&path).await.expect("read").expect("exists");
        assert!(!is_terminated(&partial));
        assert!(!partial.split(['\n', '\r']).any(|l| l.starts_with(TERMINAL_PREFIX)));
        assert!(partial.contains("\n === run completed ===\r === run failed: x ===\n"));

        log.finish("failed: multi\nline").await.expect("finish");
        let done = read_all(&path).await.expect("read").expect("exists");
        let markers: Vec<&str> = done
            .lines()
            .filter(|l| l.starts_with(TERMINAL_PREFIX))
            .collect();
        assert_eq!(markers, vec!["=== run failed: multi line ==="]);
    }

    #[test]
    fn text_without_markers_is_borrowed() {
        assert!(matches!(neutralize_markers("a\nb === run x"), Cow::Borrowed(_)));
        assert_eq!(neutralize_markers("=== run x"), " === run x");
    }

    #[tokio::test]
    async fn create_truncates_previous_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.log");
        {
            let mut log = ProgressLog::create(&path).await.expect("create");
            log.append("old run").await.expect("append");
        }
        let _log = ProgressLog::create(&path).await.expect("recreate");
        assert_eq!(read_all(&path).await.expect("read").as_deref(), Some(""));
    }

    #[tokio::test]
    async fn missing_log_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let got = read_all(&dir.path().join("nope.log")).await.expect("read");
        assert!(got.is_none());
    }
}
