use crate::camera::{CameraProvider, CaptureError, Frame, FrameEncoding, FrameSource};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::time::Instant;

const LOG_TARGET: &str = "camera::replay";

/// Replays still images from a directory in name order, looping forever.
#[derive(Clone, Debug)]
pub struct DirectoryReplayProvider {
    dir: PathBuf,
}

impl DirectoryReplayProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CameraProvider for DirectoryReplayProvider {
    fn acquire(&self) -> BoxFuture<'_, Result<Box<dyn FrameSource>, CaptureError>> {
        async move {
            let files = list_images(&self.dir).await?;
            if files.is_empty() {
                return Err(CaptureError::Unavailable(format!(
                    "no .jpg/.png frames in {}",
                    self.dir.display()
                )));
            }
            tracing::info!(
                target: LOG_TARGET,
                dir = %self.dir.display(),
                frames = files.len(),
                "replay camera acquired"
            );
            Ok(Box::new(DirectoryReplayCamera {
                files,
                cursor: 0,
                released: false,
            }) as Box<dyn FrameSource>)
        }
        .boxed()
    }
}

pub struct DirectoryReplayCamera {
    files: Vec<(PathBuf, FrameEncoding)>,
    cursor: usize,
    released: bool,
}

impl FrameSource for DirectoryReplayCamera {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Frame, CaptureError>> {
        async move {
            if self.released {
                return Err(CaptureError::Released);
            }
            let (path, encoding) = self.files[self.cursor % self.files.len()].clone();
            self.cursor = self.cursor.wrapping_add(1);
            let data = tokio::fs::read(&path).await?;
            Ok(Frame::new(Bytes::from(data), encoding, Instant::now()))
        }
        .boxed()
    }

    fn release(&mut self) -> BoxFuture<'_, ()> {
        async move {
            self.released = true;
        }
        .boxed()
    }
}

async fn list_images(dir: &Path) -> Result<Vec<(PathBuf, FrameEncoding)>, CaptureError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| CaptureError::Unavailable(format!("{}: {e}", dir.display())))?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let encoding = match ext.as_deref() {
            Some("jpg") | Some("jpeg") => FrameEncoding::Jpeg,
            Some("png") => FrameEncoding::Png,
            _ => continue,
        };
        files.push((path, encoding));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("emoconnect-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    #[tokio::test]
    async fn replays_images_in_order_and_loops() {
        let dir = scratch_dir("replay");
        std::fs::write(dir.join("b.png"), b"second").expect("write");
        std::fs::write(dir.join("a.jpg"), b"first").expect("write");
        std::fs::write(dir.join("notes.txt"), b"skip").expect("write");

        let mut cam = DirectoryReplayProvider::new(&dir)
            .acquire()
            .await
            .expect("acquire");
        let f1 = cam.next_frame().await.expect("frame");
        let f2 = cam.next_frame().await.expect("frame");
        let f3 = cam.next_frame().await.expect("frame");
        assert_eq!(&f1.data[..], b"first");
        assert_eq!(f1.encoding, FrameEncoding::Jpeg);
        assert_eq!(&f2.data[..], b"second");
        assert_eq!(f2.encoding, FrameEncoding::Png);
        assert_eq!(&f3.data[..], b"first");

        cam.release().await;
        assert!(matches!(cam.next_frame().await, Err(CaptureError::Released)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn empty_or_missing_dir_is_unavailable() {
        let dir = scratch_dir("empty");
        let err = DirectoryReplayProvider::new(&dir).acquire().await.err();
        assert!(matches!(err, Some(CaptureError::Unavailable(_))));

        let missing = dir.join("nope");
        let err = DirectoryReplayProvider::new(missing).acquire().await.err();
        assert!(matches!(err, Some(CaptureError::Unavailable(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
