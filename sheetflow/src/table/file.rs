//! Local file persistence: snapshots and append-to-CSV.

use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Writes `content` to `path`, replacing any previous file and creating
/// parent directories.
///
/// # Errors
///
/// Returns the IO error if the directory or file cannot be written.
pub async fn write_snapshot(path: &Path, content: &str) -> io::Result<()> {
    ensure_parent(path).await?;
    tokio::fs::write(path, content).await?;
    tracing::debug!(path = %path.display(), bytes = content.len(), "Wrote snapshot");
    Ok(())
}

/// Reads a snapshot back. A missing file reads as `None`.
///
/// # Errors
///
/// Returns the IO error for any failure other than a missing file.
pub async fn read_snapshot(path: &Path) -> io::Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Appends CSV text to a file.
///
/// A missing or empty file receives the whole text, header included. An
/// existing file receives everything after the first line of `content`.
/// Returns the number of lines written.
///
/// # Errors
///
/// Returns the IO error if the file cannot be read or written.
pub async fn append_csv(path: &Path, content: &str) -> io::Result<usize> {
    let has_content = match tokio::fs::read_to_string(path).await {
        Ok(text) => !text.trim().is_empty(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => return Err(err),
    };

    let body = if has_content {
        content.split_once('\n').map_or("", |(_, rest)| rest)
    } else {
        content
    };
    append_lines(path, body).await
}

/// Appends text to a file as-is, starting on a fresh line.
/// Returns the number of non-blank lines written.
///
/// # Errors
///
/// Returns the IO error if the file cannot be read or written.
pub async fn append_lines(path: &Path, body: &str) -> io::Result<usize> {
    if body.trim().is_empty() {
        return Ok(0);
    }
    let needs_newline = match tokio::fs::read(path).await {
        Ok(bytes) => bytes.last().is_some_and(|b| *b != b'\n'),
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => return Err(err),
    };

    let mut payload = String::with_capacity(body.len() + 2);
    if needs_newline {
        payload.push('\n');
    }
    payload.push_str(body);
    if !payload.ends_with('\n') {
        payload.push('\n');
    }

    ensure_parent(path).await?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(payload.as_bytes()).await?;
    file.flush().await?;

    Ok(body.lines().filter(|l| !l.trim().is_empty()).count())
}

async fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_snapshot_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshots").join("raw.csv");

        write_snapshot(&path, "first").await.unwrap();
        write_snapshot(&path, "second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
    }

    #[tokio::test]
    async fn test_read_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.csv");

        assert_eq!(read_snapshot(&path).await.unwrap(), None);
        append_csv(&path, "Date,Symbol\n2025-06-20,SPY\n").await.unwrap();
        assert_eq!(
            read_snapshot(&path).await.unwrap().as_deref(),
            Some("Date,Symbol\n2025-06-20,SPY\n")
        );
        assert!(read_snapshot(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_append_to_missing_file_keeps_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let written = append_csv(&path, "Date,Symbol\n2025-06-20,SPY\n").await.unwrap();

        assert_eq!(written, 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Date,Symbol\n2025-06-20,SPY\n");
    }

    #[tokio::test]
    async fn test_append_to_existing_file_drops_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "Date,Symbol\n2025-06-19,SPY").unwrap();

        let written = append_csv(&path, "Date,Symbol\n2025-06-20,SPY\n2025-06-20,QQQ")
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Date,Symbol\n2025-06-19,SPY\n2025-06-20,SPY\n2025-06-20,QQQ\n"
        );
    }

    #[tokio::test]
    async fn test_append_header_only_to_existing_file_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "Date,Symbol\n").unwrap();

        assert_eq!(append_csv(&path, "Date,Symbol").await.unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Date,Symbol\n");
    }

    #[tokio::test]
    async fn test_append_lines_keeps_first_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sheet.csv");
        std::fs::write(&path, "Date,Symbol").unwrap();

        let written = append_lines(&path, "2025-06-20,SPY\n").await.unwrap();

        assert_eq!(written, 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Date,Symbol\n2025-06-20,SPY\n");
    }

    #[tokio::test]
    async fn test_append_to_blank_file_writes_everything() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "\n").unwrap();

        append_csv(&path, "Date,Symbol\n2025-06-20,SPY\n").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "\nDate,Symbol\n2025-06-20,SPY\n"
        );
    }
}
