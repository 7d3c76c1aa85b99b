use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::ProcessingError;

pub const MAX_NOTE_CHARS: usize = 200;
pub const MAX_MOTION_PROMPT_CHARS: usize = 150;

/// The five wizard steps, in order. Normal flow is
/// Upload -> Enhance -> Generate -> Complete; `Prompt` is an optional stop
/// for editing the note before generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    Upload,
    Enhance,
    Prompt,
    Generate,
    Complete,
}

impl Step {
    pub fn label(self) -> &'static str {
        match self {
            Step::Upload => "upload",
            Step::Enhance => "enhance",
            Step::Prompt => "prompt",
            Step::Generate => "generate",
            Step::Complete => "complete",
        }
    }
}

/// The prepared (validated, resized) upload.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    pub bytes: Vec<u8>,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EnhancedImage {
    pub bytes: Vec<u8>,
    pub path: PathBuf,
    pub caption: String,
}

/// Credentials for the two providers. Preserved across `reset`.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub gemini_api_key: Option<String>,
    pub replicate_api_token: Option<String>,
}

impl Credentials {
    pub fn has_gemini(&self) -> bool {
        self.gemini_api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub fn has_replicate(&self) -> bool {
        self.replicate_api_token
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Default)]
struct WorkflowState {
    current_step: Option<Step>,
    original_image: Option<ImageArtifact>,
    enhanced_image: Option<EnhancedImage>,
    video_path: Option<PathBuf>,
    user_note: String,
    motion_prompt: String,
    is_processing: bool,
    progress: u8,
    error: Option<ProcessingError>,
    credentials: Credentials,
    enhance_started: bool,
    generate_started: bool,
    temp_files: Vec<PathBuf>,
}

/// Single-writer workflow state container. All mutation goes through the
/// named actions below; step transitions happen either atomically inside a
/// terminal-artifact setter or through `advance_to`, which enforces
/// forward-only movement and the capability predicate.
pub struct WorkflowStore {
    inner: Mutex<WorkflowState>,
}

impl WorkflowStore {
    pub fn new(credentials: Credentials) -> Self {
        let state = WorkflowState {
            current_step: Some(Step::Upload),
            credentials,
            ..Default::default()
        };
        WorkflowStore {
            inner: Mutex::new(state),
        }
    }

    pub fn current_step(&self) -> Step {
        self.inner.lock().current_step.unwrap_or(Step::Upload)
    }

    pub fn credentials(&self) -> Credentials {
        self.inner.lock().credentials.clone()
    }

    pub fn original_image(&self) -> Option<ImageArtifact> {
        self.inner.lock().original_image.clone()
    }

    pub fn enhanced_image(&self) -> Option<EnhancedImage> {
        self.inner.lock().enhanced_image.clone()
    }

    pub fn video_path(&self) -> Option<PathBuf> {
        self.inner.lock().video_path.clone()
    }

    pub fn user_note(&self) -> String {
        self.inner.lock().user_note.clone()
    }

    pub fn motion_prompt(&self) -> String {
        self.inner.lock().motion_prompt.clone()
    }

    pub fn progress(&self) -> u8 {
        self.inner.lock().progress
    }

    pub fn is_processing(&self) -> bool {
        self.inner.lock().is_processing
    }

    pub fn error(&self) -> Option<ProcessingError> {
        self.inner.lock().error.clone()
    }

    /// A step is enterable only once its predecessor artifact exists.
    pub fn can_enter(&self, step: Step) -> bool {
        let state = self.inner.lock();
        match step {
            Step::Upload => true,
            Step::Enhance => state.original_image.is_some(),
            Step::Prompt | Step::Generate => {
                state.original_image.is_some() || state.enhanced_image.is_some()
            }
            Step::Complete => state.video_path.is_some(),
        }
    }

    /// Commits the prepared upload and transitions to `Enhance` atomically.
    pub fn set_original_image(&self, image: ImageArtifact) {
        let mut state = self.inner.lock();
        state.temp_files.push(image.path.clone());
        state.original_image = Some(image);
        state.error = None;
        state.current_step = Some(Step::Enhance);
    }

    pub fn set_enhanced_image(&self, image: EnhancedImage) {
        let mut state = self.inner.lock();
        state.temp_files.push(image.path.clone());
        state.enhanced_image = Some(image);
        state.error = None;
    }

    pub fn set_video(&self, path: PathBuf) {
        let mut state = self.inner.lock();
        state.temp_files.push(path.clone());
        state.video_path = Some(path);
        state.error = None;
    }

    pub fn set_note(&self, note: &str) {
        let truncated: String = note.chars().take(MAX_NOTE_CHARS).collect();
        self.inner.lock().user_note = truncated;
    }

    pub fn set_motion_prompt(&self, prompt: &str) {
        let truncated: String = prompt.trim().chars().take(MAX_MOTION_PROMPT_CHARS).collect();
        self.inner.lock().motion_prompt = truncated;
    }

    pub fn set_processing(&self, processing: bool) {
        self.inner.lock().is_processing = processing;
    }

    pub fn set_progress(&self, value: u8) {
        self.inner.lock().progress = value.min(100);
    }

    pub fn set_error(&self, error: Option<ProcessingError>) {
        self.inner.lock().error = error;
    }

    /// Forward-only transition used by the two delayed advances. Returns
    /// false (and leaves the state untouched) when the move is backwards or
    /// the target step's predecessor artifact is missing.
    pub fn advance_to(&self, step: Step) -> bool {
        if !self.can_enter(step) {
            warn!("Refusing transition to {}: missing predecessor artifact", step.label());
            return false;
        }
        let mut state = self.inner.lock();
        let current = state.current_step.unwrap_or(Step::Upload);
        if step <= current {
            warn!(
                "Refusing backwards transition {} -> {}",
                current.label(),
                step.label()
            );
            return false;
        }
        state.current_step = Some(step);
        state.progress = 0;
        true
    }

    /// One-shot entry guard for the enhance/generate controllers. Returns
    /// false when the step has already been started (duplicate invocation).
    pub fn begin_step(&self, step: Step) -> bool {
        let mut state = self.inner.lock();
        let flag = match step {
            Step::Enhance => &mut state.enhance_started,
            Step::Generate => &mut state.generate_started,
            _ => return true,
        };
        if *flag {
            return false;
        }
        *flag = true;
        true
    }

    /// Re-arms a step after a retryable failure.
    pub fn clear_started(&self, step: Step) {
        let mut state = self.inner.lock();
        match step {
            Step::Enhance => state.enhance_started = false,
            Step::Generate => state.generate_started = false,
            _ => {}
        }
        state.error = None;
    }

    /// "Start over": clears everything except the stored credentials and
    /// removes any session-local media files.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        for path in state.temp_files.drain(..) {
            if let Err(err) = fs::remove_file(&path) {
                if path.exists() {
                    warn!("Failed to remove session file {}: {err}", path.display());
                }
            }
        }
        let credentials = std::mem::take(&mut state.credentials);
        *state = WorkflowState {
            current_step: Some(Step::Upload),
            credentials,
            ..Default::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_creds() -> WorkflowStore {
        WorkflowStore::new(Credentials {
            gemini_api_key: Some("g-key".to_string()),
            replicate_api_token: Some("r-token".to_string()),
        })
    }

    fn artifact() -> ImageArtifact {
        ImageArtifact {
            bytes: vec![1, 2, 3],
            path: PathBuf::from("/nonexistent/session/original.jpg"),
        }
    }

    #[test]
    fn starts_at_upload_with_empty_artifacts() {
        let store = store_with_creds();
        assert_eq!(store.current_step(), Step::Upload);
        assert!(store.original_image().is_none());
        assert!(store.enhanced_image().is_none());
        assert!(store.video_path().is_none());
    }

    #[test]
    fn set_original_image_transitions_to_enhance() {
        let store = store_with_creds();
        store.set_original_image(artifact());
        assert_eq!(store.current_step(), Step::Enhance);
    }

    #[test]
    fn transitions_are_forward_only() {
        let store = store_with_creds();
        store.set_original_image(artifact());
        assert!(store.advance_to(Step::Generate));
        assert!(!store.advance_to(Step::Enhance));
        assert_eq!(store.current_step(), Step::Generate);
    }

    #[test]
    fn complete_requires_a_video_handle() {
        let store = store_with_creds();
        store.set_original_image(artifact());
        store.advance_to(Step::Generate);
        assert!(!store.advance_to(Step::Complete));
        store.set_video(PathBuf::from("/nonexistent/session/memory.mp4"));
        assert!(store.advance_to(Step::Complete));
    }

    #[test]
    fn generate_requires_an_image() {
        let store = store_with_creds();
        assert!(!store.can_enter(Step::Generate));
        store.set_original_image(artifact());
        assert!(store.can_enter(Step::Generate));
    }

    #[test]
    fn reset_returns_to_upload_and_preserves_credentials() {
        let store = store_with_creds();
        store.set_original_image(artifact());
        store.set_note("remember the lake house");
        store.set_motion_prompt("slow pan");
        store.reset();
        assert_eq!(store.current_step(), Step::Upload);
        assert!(store.original_image().is_none());
        assert_eq!(store.user_note(), "");
        assert_eq!(store.motion_prompt(), "");
        let creds = store.credentials();
        assert_eq!(creds.gemini_api_key.as_deref(), Some("g-key"));
        assert_eq!(creds.replicate_api_token.as_deref(), Some("r-token"));
    }

    #[test]
    fn progress_is_clamped() {
        let store = store_with_creds();
        store.set_progress(250);
        assert_eq!(store.progress(), 100);
    }

    #[test]
    fn note_and_prompt_are_truncated() {
        let store = store_with_creds();
        store.set_note(&"x".repeat(500));
        assert_eq!(store.user_note().chars().count(), MAX_NOTE_CHARS);
        store.set_motion_prompt(&"y".repeat(500));
        assert_eq!(store.motion_prompt().chars().count(), MAX_MOTION_PROMPT_CHARS);
    }

    #[test]
    fn begin_step_is_one_shot_until_cleared() {
        let store = store_with_creds();
        assert!(store.begin_step(Step::Enhance));
        assert!(!store.begin_step(Step::Enhance));
        store.clear_started(Step::Enhance);
        assert!(store.begin_step(Step::Enhance));
    }
}
