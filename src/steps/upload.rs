use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::{ProcessingError, WizardError};
use crate::media;
use crate::storage::unique_session_file;
use crate::store::{ImageArtifact, Step, WorkflowStore};
use crate::utils::timing::StepTimer;

/// Validates and prepares the uploaded photo, then commits it to the store
/// (which transitions the wizard to the enhance step). A rejected upload
/// records a validation error and causes no transition.
pub async fn run(
    store: &Arc<WorkflowStore>,
    session_dir: &Path,
    photo_path: &Path,
) -> Result<(), WizardError> {
    let mut timer = StepTimer::start(Step::Upload.label());

    let result = prepare(store, session_dir, photo_path).await;
    match &result {
        Ok(()) => timer.complete("success", None),
        Err(err) => {
            store.set_error(Some(ProcessingError::new(Step::Upload, err)));
            timer.complete("error", Some(err.to_string()));
        }
    }
    result
}

async fn prepare(
    store: &Arc<WorkflowStore>,
    session_dir: &Path,
    photo_path: &Path,
) -> Result<(), WizardError> {
    let raw = tokio::fs::read(photo_path).await.map_err(|err| {
        WizardError::Validation(format!("Could not read {}: {err}", photo_path.display()))
    })?;

    let mime = media::validate_upload(&raw)?;
    let prepared = media::prepare_image(&raw)
        .map_err(|err| WizardError::Validation(format!("Could not process photo: {err}")))?;

    let local_path = unique_session_file(session_dir, "original", "jpg");
    tokio::fs::write(&local_path, &prepared).await.map_err(|err| {
        WizardError::Validation(format!("Could not store prepared photo: {err}"))
    })?;

    info!(
        "Accepted {} ({mime}, {} bytes raw, {} bytes prepared)",
        photo_path.display(),
        raw.len(),
        prepared.len()
    );
    store.set_original_image(ImageArtifact {
        bytes: prepared,
        path: local_path,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Credentials;
    use image::{DynamicImage, ImageBuffer, Rgb};
    use std::fs;

    fn session_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("relive-upload-{tag}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_sample_jpeg(dir: &Path, width: u32, height: u32) -> std::path::PathBuf {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128])
        });
        let path = dir.join("input.jpg");
        DynamicImage::ImageRgb8(img).save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn rejected_upload_causes_no_transition() {
        let dir = session_dir("reject");
        let bad = dir.join("notes.txt");
        fs::write(&bad, "definitely not a photo").unwrap();

        let store = Arc::new(WorkflowStore::new(Credentials::default()));
        let err = run(&store, &dir, &bad).await.unwrap_err();
        assert!(matches!(err, WizardError::Validation(_)));
        assert_eq!(store.current_step(), Step::Upload);
        assert!(store.error().is_some());
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn accepted_upload_prepares_and_advances() {
        let dir = session_dir("accept");
        let input = write_sample_jpeg(&dir, 2000, 2000);

        let store = Arc::new(WorkflowStore::new(Credentials::default()));
        run(&store, &dir, &input).await.unwrap();

        assert_eq!(store.current_step(), Step::Enhance);
        let artifact = store.original_image().unwrap();
        assert!(artifact.path.exists());
        let img = image::load_from_memory(&artifact.bytes).unwrap();
        assert!(img.width().max(img.height()) <= crate::media::MAX_EDGE_PX);
        assert!(artifact.bytes.len() <= crate::media::MAX_PREPARED_BYTES);
        let _ = fs::remove_dir_all(&dir);
    }
}
