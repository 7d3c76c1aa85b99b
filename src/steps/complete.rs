use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::media;
use crate::store::WorkflowStore;

/// Paths of the artifacts exported to the user's output directory.
#[derive(Debug, Default)]
pub struct Exports {
    pub video: Option<PathBuf>,
    pub poster: Option<PathBuf>,
}

/// Copies the generated video into the output directory.
pub async fn export_video(store: &Arc<WorkflowStore>, output_dir: &Path) -> Result<PathBuf> {
    let source = store
        .video_path()
        .ok_or_else(|| anyhow!("No video to export"))?;
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let target = output_dir.join("memory.mp4");
    tokio::fs::copy(&source, &target)
        .await
        .with_context(|| format!("Failed to export {}", target.display()))?;
    Ok(target)
}

/// Exports the enhanced photo (the video's poster frame) with the watermark
/// applied.
pub async fn export_poster(store: &Arc<WorkflowStore>, output_dir: &Path) -> Result<PathBuf> {
    let enhanced = store
        .enhanced_image()
        .ok_or_else(|| anyhow!("No enhanced photo to export"))?;
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let stamped = media::apply_watermark(&enhanced.bytes)?;
    let target = output_dir.join("memory.jpg");
    tokio::fs::write(&target, &stamped)
        .await
        .with_context(|| format!("Failed to export {}", target.display()))?;
    Ok(target)
}

/// Final step: presents the result and writes both exports. The video and
/// poster exports are independent; one failing does not abandon the other.
pub async fn run(store: &Arc<WorkflowStore>, output_dir: &Path) -> Exports {
    let mut exports = Exports::default();

    match export_video(store, output_dir).await {
        Ok(path) => {
            info!("Video exported to {}", path.display());
            exports.video = Some(path);
        }
        Err(err) => info!("Video export skipped: {err}"),
    }

    match export_poster(store, output_dir).await {
        Ok(path) => {
            info!("Poster exported to {}", path.display());
            exports.poster = Some(path);
        }
        Err(err) => info!("Poster export skipped: {err}"),
    }

    if let Some(enhanced) = store.enhanced_image() {
        println!("\n  \"{}\"", enhanced.caption);
    }
    exports
}

/// "Start over": clears the workflow (credentials survive) and releases the
/// session media files.
pub fn start_over(store: &Arc<WorkflowStore>) {
    store.reset();
    info!("Workflow reset; credentials preserved");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Credentials, EnhancedImage, ImageArtifact, Step};
    use std::fs;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("relive-complete-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample_jpeg() -> Vec<u8> {
        use image::{DynamicImage, ImageBuffer, Rgb};
        let img = ImageBuffer::from_fn(64, 48, |x, y| Rgb([x as u8, y as u8, 0]));
        let mut buf = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Jpeg)
            .unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn exports_both_artifacts_when_present() {
        let dir = temp_dir("exports");
        let session = dir.join("session");
        fs::create_dir_all(&session).unwrap();

        let video_path = session.join("memory.mp4");
        fs::write(&video_path, b"not really mp4 bytes").unwrap();
        let jpeg = sample_jpeg();
        let poster_path = session.join("enhanced.jpg");
        fs::write(&poster_path, &jpeg).unwrap();

        let store = Arc::new(WorkflowStore::new(Credentials::default()));
        store.set_original_image(ImageArtifact {
            bytes: jpeg.clone(),
            path: session.join("original.jpg"),
        });
        store.set_enhanced_image(EnhancedImage {
            bytes: jpeg,
            path: poster_path,
            caption: "a quiet afternoon".to_string(),
        });
        store.set_video(video_path);

        let out = dir.join("out");
        let exports = run(&store, &out).await;
        assert!(exports.video.unwrap().exists());
        assert!(exports.poster.unwrap().exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn start_over_releases_session_files() {
        let dir = temp_dir("reset");
        let video_path = dir.join("memory.mp4");
        fs::write(&video_path, b"bytes").unwrap();

        let store = Arc::new(WorkflowStore::new(Credentials {
            gemini_api_key: Some("g".to_string()),
            replicate_api_token: None,
        }));
        store.set_video(video_path.clone());

        start_over(&store);
        assert!(!video_path.exists());
        assert_eq!(store.current_step(), Step::Upload);
        assert!(store.credentials().has_gemini());
        let _ = fs::remove_dir_all(&dir);
    }
}
