use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{ENHANCE_INSTRUCTION, FALLBACK_CAPTION};
use crate::error::{ProcessingError, WizardError};
use crate::progress::ProgressTicker;
use crate::providers::{EnhanceOutcome, GeminiClient, ReplicateClient};
use crate::steps::auto_advance;
use crate::storage::unique_session_file;
use crate::store::{EnhancedImage, Step, WorkflowStore};
use crate::utils::timing::StepTimer;

/// Result of the enhancement pipeline. `Original` is the degraded soft
/// success: the primary provider answered without an image, so the
/// unenhanced photo stands in for the result.
#[derive(Debug, PartialEq, Eq)]
pub enum PipelineOutput {
    Enhanced { image: Vec<u8>, caption: String },
    Original { caption: String },
}

/// Enhancement fallback policy, separated from the provider clients so it
/// can be exercised directly: alternate first when available, then the
/// primary, degrading to the original photo when the primary returns no
/// image payload.
pub async fn enhance_with_fallback<A, AFut, P, PFut>(
    alternate: Option<A>,
    primary: Option<P>,
) -> Result<PipelineOutput, WizardError>
where
    A: FnOnce() -> AFut,
    AFut: Future<Output = anyhow::Result<Vec<u8>>>,
    P: FnOnce() -> PFut,
    PFut: Future<Output = anyhow::Result<EnhanceOutcome>>,
{
    if let Some(alternate) = alternate {
        match alternate().await {
            Ok(image) => {
                return Ok(PipelineOutput::Enhanced {
                    image,
                    caption: FALLBACK_CAPTION.to_string(),
                })
            }
            Err(err) => {
                warn!("Alternate enhancement failed, falling back to primary: {err}");
            }
        }
    }

    let Some(primary) = primary else {
        return Err(WizardError::MissingCredential("gemini"));
    };

    match primary().await {
        Ok(EnhanceOutcome::Enhanced { image, caption }) => Ok(PipelineOutput::Enhanced {
            image,
            caption: caption
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_CAPTION.to_string()),
        }),
        Ok(EnhanceOutcome::NoImage { caption }) => Ok(PipelineOutput::Original {
            caption: caption
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_CAPTION.to_string()),
        }),
        Err(err) => Err(WizardError::Provider(err.to_string())),
    }
}

/// Runs the enhance step once. A second invocation while the step is armed
/// is a no-op (the hosting loop may re-enter).
pub async fn run(
    store: &Arc<WorkflowStore>,
    gemini: Option<&GeminiClient>,
    replicate: Option<&ReplicateClient>,
    session_dir: &Path,
) -> Result<(), WizardError> {
    if !store.begin_step(Step::Enhance) {
        return Ok(());
    }
    let Some(original) = store.original_image() else {
        return Err(WizardError::Validation("No photo uploaded yet.".into()));
    };

    let mut timer = StepTimer::start(Step::Enhance.label());
    store.set_processing(true);
    let ticker = ProgressTicker::ramp(store.clone());

    let alternate = replicate.map(|client| {
        let bytes = original.bytes.clone();
        move || async move { client.enhance_image(&bytes, ENHANCE_INSTRUCTION).await }
    });
    let primary = gemini.map(|client| {
        let bytes = original.bytes.clone();
        move || async move { client.enhance_image(&bytes).await }
    });

    let result = enhance_with_fallback(alternate, primary).await;
    store.set_processing(false);

    let output = match result {
        Ok(output) => output,
        Err(err) => {
            ticker.cancel();
            store.set_error(Some(ProcessingError::new(Step::Enhance, &err)));
            timer.complete("error", Some(err.to_string()));
            return Err(err);
        }
    };

    let (bytes, caption, degraded) = match output {
        PipelineOutput::Enhanced { image, caption } => (image, caption, false),
        PipelineOutput::Original { caption } => (original.bytes.clone(), caption, true),
    };

    let local_path = unique_session_file(session_dir, "enhanced", "jpg");
    if let Err(err) = tokio::fs::write(&local_path, &bytes).await {
        ticker.cancel();
        let wrapped = WizardError::Provider(format!("Could not store enhanced photo: {err}"));
        store.set_error(Some(ProcessingError::new(Step::Enhance, &wrapped)));
        timer.complete("error", Some(wrapped.to_string()));
        return Err(wrapped);
    }

    info!(
        "Enhancement complete ({} bytes, degraded={degraded}): {caption}",
        bytes.len()
    );
    store.set_enhanced_image(EnhancedImage {
        bytes,
        path: local_path,
        caption,
    });
    ticker.finish();
    timer.complete("success", degraded.then(|| "degraded".to_string()));

    auto_advance(store, Step::Generate).await;
    Ok(())
}

/// Manual retry affordance: re-arms the step and clears the error.
pub fn retry(store: &Arc<WorkflowStore>) {
    store.clear_started(Step::Enhance);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn alternate_success_skips_the_primary() {
        let primary_called = AtomicBool::new(false);
        let flag = &primary_called;
        let output = enhance_with_fallback(
            Some(|| async { Ok(vec![9u8, 9, 9]) }),
            Some(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(EnhanceOutcome::NoImage { caption: None })
            }),
        )
        .await
        .unwrap();
        assert!(matches!(output, PipelineOutput::Enhanced { .. }));
        assert!(!primary_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn alternate_failure_falls_back_to_the_primary() {
        let primary_called = AtomicBool::new(false);
        let flag = &primary_called;
        let output = enhance_with_fallback(
            Some(|| async { anyhow::bail!("alternate down") }),
            Some(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(EnhanceOutcome::Enhanced {
                    image: vec![1u8],
                    caption: Some("restored".to_string()),
                })
            }),
        )
        .await
        .unwrap();
        assert!(primary_called.load(Ordering::SeqCst));
        assert_eq!(
            output,
            PipelineOutput::Enhanced {
                image: vec![1],
                caption: "restored".to_string()
            }
        );
    }

    #[tokio::test]
    async fn no_image_payload_degrades_to_the_original() {
        type Alt = fn() -> std::future::Ready<anyhow::Result<Vec<u8>>>;
        let output = enhance_with_fallback(
            None::<Alt>,
            Some(|| async { Ok(EnhanceOutcome::NoImage { caption: None }) }),
        )
        .await
        .unwrap();
        match output {
            PipelineOutput::Original { caption } => assert!(!caption.is_empty()),
            other => panic!("expected degraded result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn both_providers_failing_surfaces_a_provider_error() {
        let err = enhance_with_fallback(
            Some(|| async { anyhow::bail!("alternate down") }),
            Some(|| async { anyhow::bail!("primary down") }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WizardError::Provider(_)));
        assert!(err.retryable());
    }

    #[tokio::test]
    async fn missing_both_credentials_is_a_blocking_error() {
        type Alt = fn() -> std::future::Ready<anyhow::Result<Vec<u8>>>;
        type Pri = fn() -> std::future::Ready<anyhow::Result<EnhanceOutcome>>;
        let err = enhance_with_fallback(None::<Alt>, None::<Pri>).await.unwrap_err();
        assert!(matches!(err, WizardError::MissingCredential("gemini")));
        assert!(!err.retryable());
    }
}
