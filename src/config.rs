use std::env;
use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::Lazy;

/// Runtime tunables, loaded once from the environment.
///
/// Credentials are deliberately not in here: they are resolved from the
/// settings store (falling back to env) and handed to the provider clients
/// at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub gemini_model: String,
    pub gemini_image_model: String,
    pub veo_model: String,
    pub gemini_temperature: f32,
    pub gemini_max_output_tokens: i32,
    pub replicate_image_model: String,
    pub replicate_video_model: String,
    pub veo_poll_interval_secs: u64,
    pub veo_poll_max_attempts: usize,
    pub video_duration_secs: u8,
    pub video_resolution: String,
    pub video_aspect_ratio: String,
    pub auto_advance_ms: u64,
    pub home_dir: PathBuf,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_i32(name: &str, default: i32) -> i32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Config {
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            gemini_model: env_string("GEMINI_MODEL", "gemini-2.0-flash"),
            gemini_image_model: env_string("GEMINI_IMAGE_MODEL", "gemini-2.5-flash-image-preview"),
            veo_model: env_string("VEO_MODEL", "veo-2.0-generate-001"),
            gemini_temperature: env_f32("GEMINI_TEMPERATURE", 0.7),
            gemini_max_output_tokens: env_i32("GEMINI_MAX_OUTPUT_TOKENS", 256),
            replicate_image_model: env_string("REPLICATE_IMAGE_MODEL", "google/nano-banana"),
            replicate_video_model: env_string(
                "REPLICATE_VIDEO_MODEL",
                "wan-video/wan-2.2-i2v-fast",
            ),
            veo_poll_interval_secs: env_u64("VEO_POLL_INTERVAL_SECS", 10),
            veo_poll_max_attempts: env_usize("VEO_POLL_MAX_ATTEMPTS", 30),
            video_duration_secs: env_u64("VIDEO_DURATION_SECS", 5) as u8,
            video_resolution: env_string("VIDEO_RESOLUTION", "480p"),
            video_aspect_ratio: env_string("VIDEO_ASPECT_RATIO", "16:9"),
            auto_advance_ms: env_u64("AUTO_ADVANCE_MS", 1200),
            home_dir: PathBuf::from(env_string("RELIVE_HOME", ".relive")),
        })
    }
}

pub const ENHANCE_INSTRUCTION: &str = "Enhance this photograph: improve sharpness, restore faded \
colors, repair visible damage and remove noise, while preserving the original composition and \
the identity of every person in it. Also write one short, warm caption for the restored photo. \
CRITICAL: the response must contain an image.";

pub const MOTION_PROMPT_SYSTEM: &str = "You write motion descriptions for image-to-video \
generation. Given a photograph, describe in one sentence (under 150 characters) the subtle, \
natural camera and subject motion that would bring it to life. Mention no text overlays, no \
scene changes, no new objects. Respond with the sentence only.";

pub const FALLBACK_MOTION_PROMPT: &str =
    "Gentle camera push-in as the scene comes to life with subtle, natural motion.";

pub const FALLBACK_CAPTION: &str = "A cherished moment, brought back to life.";
