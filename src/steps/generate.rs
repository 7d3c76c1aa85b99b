use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{FALLBACK_MOTION_PROMPT, MOTION_PROMPT_SYSTEM};
use crate::error::{ProcessingError, WizardError};
use crate::progress::ProgressTicker;
use crate::providers::{GeminiClient, ReplicateClient, VeoClient, VeoResult};
use crate::steps::auto_advance;
use crate::storage::unique_session_file;
use crate::store::{Step, WorkflowStore};
use crate::utils::timing::StepTimer;

/// Video fallback policy, separated from the clients: run the primary
/// provider and, when it fails (including the poll timeout), attempt the
/// alternate before surfacing anything. The alternate's error wins when
/// both fail, since it is the later attempt.
pub async fn primary_then_alternate<P, PFut, A, AFut>(
    primary: P,
    alternate: Option<A>,
) -> Result<Vec<u8>, WizardError>
where
    P: FnOnce() -> PFut,
    PFut: Future<Output = Result<Vec<u8>, WizardError>>,
    A: FnOnce() -> AFut,
    AFut: Future<Output = anyhow::Result<Vec<u8>>>,
{
    let primary_err = match primary().await {
        Ok(video) => return Ok(video),
        Err(err) => err,
    };

    let Some(alternate) = alternate else {
        return Err(primary_err);
    };

    warn!("Primary video generation failed ({primary_err}), trying the alternate provider");
    alternate()
        .await
        .map_err(|err| WizardError::Provider(err.to_string()))
}

fn prompt_instruction(note: &str) -> String {
    if note.trim().is_empty() {
        "Describe the motion for this photo.".to_string()
    } else {
        format!(
            "Describe the motion for this photo. The user adds this wish about the memory: {}",
            note.trim()
        )
    }
}

/// Phase 1: derive a motion description, streaming chunks to the console.
/// Any failure degrades to the fixed generic sentence.
async fn resolve_motion_prompt(
    store: &Arc<WorkflowStore>,
    gemini: Option<&GeminiClient>,
    image: &[u8],
) {
    if !store.motion_prompt().is_empty() {
        return;
    }

    let prompt = match gemini {
        Some(client) => {
            let instruction = prompt_instruction(&store.user_note());
            match client
                .generate_text_streaming(MOTION_PROMPT_SYSTEM, &instruction, Some(image), |chunk| {
                    print!("{chunk}");
                })
                .await
            {
                Ok(text) => {
                    println!();
                    text
                }
                Err(err) => {
                    // The streaming endpoint is flakier than the plain one;
                    // try a single non-streaming call before giving up.
                    warn!("Streamed motion prompt failed, retrying without streaming: {err}");
                    match client
                        .generate_text(MOTION_PROMPT_SYSTEM, &instruction, Some(image))
                        .await
                    {
                        Ok(text) => text,
                        Err(err) => {
                            warn!("Motion prompt generation failed, using the fallback: {err}");
                            FALLBACK_MOTION_PROMPT.to_string()
                        }
                    }
                }
            }
        }
        None => FALLBACK_MOTION_PROMPT.to_string(),
    };
    store.set_motion_prompt(&prompt);
}

/// Runs the generate step once: prompt phase, then video phase with the
/// provider-selection policy of the wizard.
pub async fn run(
    store: &Arc<WorkflowStore>,
    gemini: Option<&GeminiClient>,
    veo: Option<&VeoClient>,
    replicate: Option<&ReplicateClient>,
    session_dir: &Path,
) -> Result<(), WizardError> {
    if !store.begin_step(Step::Generate) {
        return Ok(());
    }
    let source = match store.enhanced_image() {
        Some(enhanced) => enhanced.bytes,
        None => match store.original_image() {
            Some(original) => original.bytes,
            None => return Err(WizardError::Validation("No photo to animate yet.".into())),
        },
    };

    let mut timer = StepTimer::start(Step::Generate.label());
    store.set_processing(true);

    resolve_motion_prompt(store, gemini, &source).await;
    let motion_prompt = store.motion_prompt();
    info!("Motion prompt: {motion_prompt}");

    // Fresh ticker per attempt; dropping it on any exit path kills the task.
    let ticker = ProgressTicker::eased(store.clone());

    let result = match (replicate, veo) {
        // Alternate video credential present: use it directly.
        (Some(alternate), _) => alternate
            .generate_video(&source, &motion_prompt)
            .await
            .map_err(|err| WizardError::Provider(err.to_string())),
        (None, Some(primary)) => {
            type NoAlternate = fn() -> std::future::Ready<anyhow::Result<Vec<u8>>>;
            let prompt = motion_prompt.as_str();
            let image = source.as_slice();
            primary_then_alternate(
                move || async move {
                    match primary.generate_video(prompt, image).await {
                        Ok(VeoResult::Video(bytes)) => Ok(bytes),
                        Ok(VeoResult::TimedOut) => Err(WizardError::Timeout),
                        Err(err) => Err(WizardError::Provider(err.to_string())),
                    }
                },
                None::<NoAlternate>,
            )
            .await
        }
        (None, None) => Err(WizardError::MissingCredential("gemini")),
    };
    store.set_processing(false);

    let video = match result {
        Ok(video) => video,
        Err(err) => {
            ticker.cancel();
            store.set_error(Some(ProcessingError::new(Step::Generate, &err)));
            timer.complete("error", Some(err.to_string()));
            return Err(err);
        }
    };

    let local_path = unique_session_file(session_dir, "memory", "mp4");
    if let Err(err) = tokio::fs::write(&local_path, &video).await {
        ticker.cancel();
        let wrapped = WizardError::Provider(format!("Could not store video: {err}"));
        store.set_error(Some(ProcessingError::new(Step::Generate, &wrapped)));
        timer.complete("error", Some(wrapped.to_string()));
        return Err(wrapped);
    }

    info!("Video ready ({} bytes): {}", video.len(), local_path.display());
    store.set_video(local_path);
    ticker.finish();
    timer.complete("success", None);

    auto_advance(store, Step::Complete).await;
    Ok(())
}

/// Manual retry affordance: re-arms the step and clears the error.
pub fn retry(store: &Arc<WorkflowStore>) {
    store.clear_started(Step::Generate);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn primary_success_skips_the_alternate() {
        let alternate_called = AtomicBool::new(false);
        let flag = &alternate_called;
        let video = primary_then_alternate(
            || async { Ok(vec![1u8, 2, 3]) },
            Some(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(vec![9u8])
            }),
        )
        .await
        .unwrap();
        assert_eq!(video, vec![1, 2, 3]);
        assert!(!alternate_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn timeout_falls_back_to_the_alternate_when_credentialed() {
        let alternate_called = AtomicBool::new(false);
        let flag = &alternate_called;
        let video = primary_then_alternate(
            || async { Err(WizardError::Timeout) },
            Some(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(vec![7u8, 7])
            }),
        )
        .await
        .unwrap();
        assert!(alternate_called.load(Ordering::SeqCst));
        assert_eq!(video, vec![7, 7]);
    }

    #[tokio::test]
    async fn timeout_without_an_alternate_surfaces_the_timeout() {
        type NoAlternate = fn() -> std::future::Ready<anyhow::Result<Vec<u8>>>;
        let err = primary_then_alternate(
            || async { Err(WizardError::Timeout) },
            None::<NoAlternate>,
        )
        .await
        .unwrap_err();
        assert_eq!(err, WizardError::Timeout);
        assert!(err.retryable());
    }

    #[tokio::test]
    async fn both_failing_surfaces_the_alternate_error() {
        let err = primary_then_alternate(
            || async { Err(WizardError::Timeout) },
            Some(|| async { anyhow::bail!("alternate rejected the clip") }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WizardError::Provider(_)));
    }

    #[test]
    fn note_is_woven_into_the_instruction() {
        let with_note = prompt_instruction("make it feel like summer 1999");
        assert!(with_note.contains("summer 1999"));
        let without = prompt_instruction("   ");
        assert!(!without.contains("wish"));
    }
}
