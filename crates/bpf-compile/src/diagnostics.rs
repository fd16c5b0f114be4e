//! Bounded capture of toolchain stderr.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on retained diagnostic output.
pub const MAX_DIAGNOSTIC_BYTES: usize = 1_000_000;

/// The retained prefix of the toolchain's error stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticTail {
    bytes: Vec<u8>,
    truncated: bool,
}

impl DiagnosticTail {
    pub fn from_bytes(bytes: Vec<u8>, limit: usize) -> Self {
        let truncated = bytes.len() > limit;
        let mut bytes = bytes;
        bytes.truncate(limit);
        Self { bytes, truncated }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// More output was produced than was kept.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Non-empty lines, lossily decoded.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.bytes
            .split(|b| *b == b'\n')
            .map(|line| String::from_utf8_lossy(line).trim_end().to_string())
            .filter(|line| !line.is_empty())
    }
}

/// Read `reader` to the end, keeping at most `limit` bytes.
///
/// Everything past the limit is drained and dropped so the writer never
/// blocks on a full pipe.
pub async fn read_bounded<R>(reader: R, limit: usize) -> std::io::Result<DiagnosticTail>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut limited = reader.take(limit as u64);
    limited.read_to_end(&mut kept).await?;

    let mut rest = limited.into_inner();
    let dropped = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await?;

    Ok(DiagnosticTail {
        bytes: kept,
        truncated: dropped > 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_bounded_under_limit() {
        let input: &[u8] = b"error: one\nwarning: two\n";
        let tail = read_bounded(input, 1024).await.unwrap();
        assert!(!tail.truncated());
        let lines: Vec<_> = tail.lines().collect();
        assert_eq!(lines, vec!["error: one", "warning: two"]);
    }

    #[tokio::test]
    async fn test_read_bounded_truncates_and_drains() {
        let input = vec![b'x'; 4096];
        let tail = read_bounded(input.as_slice(), 100).await.unwrap();
        assert_eq!(tail.as_bytes().len(), 100);
        assert!(tail.truncated());
    }

    #[test]
    fn test_from_bytes_exact_limit_not_truncated() {
        let tail = DiagnosticTail::from_bytes(vec![b'a'; 10], 10);
        assert!(!tail.truncated());
        assert_eq!(tail.lines().count(), 1);
    }
}
