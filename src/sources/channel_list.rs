//! Channel-list resource reader
//!
//! Channel lists are plain UTF-8 text: `<category>,#genre#` marker lines and
//! `<channel>,<url>` data lines. This module only gets the raw lines off disk;
//! parsing belongs to the endpoint registry. A missing or unreadable file is
//! logged and skipped so that one absent input never aborts a run.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Raw lines gathered from every readable channel-list resource, in order
#[derive(Debug, Default, Clone)]
pub struct ChannelListLines {
    pub lines: Vec<String>,
    pub files_read: usize,
    pub files_skipped: Vec<PathBuf>,
}

impl ChannelListLines {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Read all channel-list files in order
pub async fn read_channel_lists(paths: &[PathBuf]) -> ChannelListLines {
    let mut collected = ChannelListLines::default();

    for path in paths {
        match read_one(path).await {
            Ok(lines) => {
                debug!("Read {} lines from {}", lines.len(), path.display());
                collected.lines.extend(lines);
                collected.files_read += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable channel list");
                collected.files_skipped.push(path.clone());
            }
        }
    }

    info!(
        "Loaded {} lines from {} channel list(s) ({} skipped)",
        collected.lines.len(),
        collected.files_read,
        collected.files_skipped.len()
    );
    collected
}

async fn read_one(path: &Path) -> std::io::Result<Vec<String>> {
    let bytes = tokio::fs::read(path).await?;
    let text = String::from_utf8_lossy(&bytes);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&*text);
    Ok(text.lines().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_files_in_order_and_skips_missing() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("live.txt");
        let second = dir.path().join("IPTV2.txt");
        tokio::fs::write(&first, "\u{feff}央视频道,#genre#\nCCTV1,http://10.0.0.1:80/a\n")
            .await
            .unwrap();
        tokio::fs::write(&second, "CCTV2,http://10.0.0.2:80/b").await.unwrap();

        let missing = dir.path().join("absent.txt");
        let loaded = read_channel_lists(&[first, missing.clone(), second]).await;

        assert_eq!(loaded.files_read, 2);
        assert_eq!(loaded.files_skipped, vec![missing]);
        assert_eq!(
            loaded.lines,
            vec![
                "央视频道,#genre#".to_string(),
                "CCTV1,http://10.0.0.1:80/a".to_string(),
                "CCTV2,http://10.0.0.2:80/b".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_readable_input_is_empty_not_error() {
        let loaded = read_channel_lists(&[PathBuf::from("/nonexistent/live.txt")]).await;
        assert!(loaded.is_empty());
        assert_eq!(loaded.files_read, 0);
    }
}
