//! Downstream storage for retrieved items

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::Item;
use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::ledger::json_file::write_json_atomic;
use crate::types::{RequestId, Window};

/// Receives the items of each fetched sub-window
///
/// The manager may hand the same window over twice after a crash between the
/// store and the checkpoint, so implementations should be idempotent on item
/// identity. An error fails the request without a retry.
#[async_trait]
pub trait ItemSink: Send + Sync {
    /// Store one window's items
    async fn store(&self, request_id: &RequestId, window: &Window, items: &[Item]) -> Result<()>;
}

/// Sink writing one JSON document per request and window
///
/// Documents live at `<data_dir>/<request id>/<start>_<end>.json` and are
/// replaced by atomic rename, so storing a window again overwrites the
/// earlier copy instead of duplicating it.
#[derive(Clone, Debug)]
pub struct FileSink {
    data_dir: PathBuf,
}

#[derive(Serialize)]
struct WindowDocument<'a> {
    request_id: &'a RequestId,
    window: &'a Window,
    item_count: usize,
    items: &'a [Item],
}

impl FileSink {
    /// Sink rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Sink rooted at `config.data_dir`
    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self::new(&config.data_dir)
    }

    /// Root directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// File holding one window of one request
    pub fn window_path(&self, request_id: &RequestId, window: &Window) -> PathBuf {
        const STAMP: &str = "%Y%m%dT%H%M%SZ";
        self.data_dir.join(path_segment(request_id)).join(format!(
            "{}_{}.json",
            window.start.format(STAMP),
            window.end.format(STAMP)
        ))
    }
}

#[async_trait]
impl ItemSink for FileSink {
    async fn store(&self, request_id: &RequestId, window: &Window, items: &[Item]) -> Result<()> {
        let path = self.window_path(request_id, window);
        let document = WindowDocument {
            request_id,
            window,
            item_count: items.len(),
            items,
        };
        write_json_atomic(&path, &document).await?;
        tracing::debug!(
            request_id = %request_id,
            window = %window,
            items = items.len(),
            path = %path.display(),
            "stored window items"
        );
        Ok(())
    }
}

/// Request id made safe as a single directory name
fn path_segment(id: &RequestId) -> String {
    id.as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Sink that discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

#[async_trait]
impl ItemSink for NullSink {
    async fn store(&self, request_id: &RequestId, window: &Window, items: &[Item]) -> Result<()> {
        tracing::trace!(
            request_id = %request_id,
            window = %window,
            items = items.len(),
            "discarding items"
        );
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::{Value, json};
    use tempfile::tempdir;

    fn jan(day: u32) -> Window {
        Window::new(
            Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, day + 1, 0, 0, 0).unwrap(),
        )
    }

    fn read(path: &Path) -> Value {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn window_is_written_under_request_directory() {
        let dir = tempdir().unwrap();
        let sink = FileSink::new(dir.path());
        let id = RequestId::from("crawl-1");

        sink.store(&id, &jan(1), &[json!({ "n": 1 }), json!({ "n": 2 })])
            .await
            .unwrap();

        let path = dir
            .path()
            .join("crawl-1")
            .join("20240101T000000Z_20240102T000000Z.json");
        assert_eq!(sink.window_path(&id, &jan(1)), path);
        let document = read(&path);
        assert_eq!(document["request_id"], "crawl-1");
        assert_eq!(document["item_count"], 2);
        assert_eq!(document["items"][1]["n"], 2);
    }

    #[tokio::test]
    async fn storing_a_window_again_replaces_it() {
        let dir = tempdir().unwrap();
        let sink = FileSink::new(dir.path());
        let id = RequestId::from("again");

        sink.store(&id, &jan(3), &[json!(1), json!(2)]).await.unwrap();
        sink.store(&id, &jan(3), &[json!(1)]).await.unwrap();
        sink.store(&id, &jan(4), &[]).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path().join("again"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files.len(), 2);
        assert_eq!(read(&sink.window_path(&id, &jan(3)))["item_count"], 1);
        assert_eq!(read(&sink.window_path(&id, &jan(4)))["item_count"], 0);
    }

    #[test]
    fn request_ids_cannot_escape_the_data_dir() {
        let sink = FileSink::new("/data");
        let path = sink.window_path(&RequestId::from("../etc/x y"), &jan(1));
        assert_eq!(path.parent().unwrap(), Path::new("/data/___etc_x_y"));
    }
}
