use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use dotenvy::dotenv;
use tracing::{error, info};

mod config;
mod error;
mod media;
mod poll;
mod progress;
mod providers;
mod steps;
mod storage;
mod store;
mod utils;

use config::CONFIG;
use error::WizardError;
use providers::{GeminiClient, ReplicateClient, VeoClient};
use storage::SettingsStore;
use store::WorkflowStore;
use utils::logging::init_logging;

fn usage() -> &'static str {
    "Usage:\n  relive create <photo> [--note <text>] [--output-dir <dir>]\n  relive set-credential <gemini|replicate> <key>\n  relive set-note <text>\n  relive clear-note\n  relive reset"
}

struct CreateArgs {
    photo: PathBuf,
    note: Option<String>,
    output_dir: PathBuf,
}

fn parse_create_args(args: &[String]) -> anyhow::Result<CreateArgs> {
    let mut photo = None;
    let mut note = None;
    let mut output_dir = PathBuf::from(".");

    let mut index = 2;
    while index < args.len() {
        match args[index].as_str() {
            "--note" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --note"))?;
                note = Some(value.clone());
            }
            "--output-dir" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --output-dir"))?;
                output_dir = PathBuf::from(value);
            }
            other if photo.is_none() && !other.starts_with("--") => {
                photo = Some(PathBuf::from(other));
            }
            other => return Err(anyhow!("Unexpected argument: {other}")),
        }
        index += 1;
    }

    Ok(CreateArgs {
        photo: photo.ok_or_else(|| anyhow!("Missing photo path.\n{}", usage()))?,
        note,
        output_dir,
    })
}

/// Echoes the simulated progress to the console while a step is in flight.
fn spawn_progress_echo(store: Arc<WorkflowStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = 0u8;
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(2));
        loop {
            interval.tick().await;
            if !store.is_processing() {
                continue;
            }
            let progress = store.progress();
            if progress != last {
                println!("  {} … {progress}%", store.current_step().label());
                last = progress;
            }
        }
    })
}

fn confirm_retry(err: &WizardError) -> bool {
    eprintln!("\n{err}");
    eprint!("Try again? [y/N] ");
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn run_wizard(args: CreateArgs) -> Result<(), WizardError> {
    let settings_store = SettingsStore::new(CONFIG.home_dir.clone());
    settings_store
        .ensure_dirs()
        .map_err(|err| WizardError::Validation(err.to_string()))?;
    let session_dir = settings_store.session_dir();

    let credentials = settings_store.resolve_credentials();
    if !credentials.has_gemini() && !credentials.has_replicate() {
        return Err(WizardError::MissingCredential("gemini"));
    }

    let gemini = credentials
        .gemini_api_key
        .as_deref()
        .map(GeminiClient::new);
    let veo = credentials.gemini_api_key.as_deref().map(VeoClient::new);
    let replicate = credentials
        .replicate_api_token
        .as_deref()
        .map(ReplicateClient::new);

    let store = Arc::new(WorkflowStore::new(credentials));
    let note = args
        .note
        .or_else(|| settings_store.load().user_note);
    if let Some(note) = note {
        store.set_note(&note);
    }

    let echo = spawn_progress_echo(store.clone());

    println!("Step 1/4: preparing your photo");
    steps::upload::run(&store, &session_dir, &args.photo).await?;

    println!("Step 2/4: enhancing");
    loop {
        match steps::enhance::run(&store, gemini.as_ref(), replicate.as_ref(), &session_dir).await {
            Ok(()) => break,
            Err(err) if err.retryable() && confirm_retry(&err) => {
                steps::enhance::retry(&store);
            }
            Err(err) => return Err(err),
        }
    }

    println!("Step 3/4: bringing it to life");
    loop {
        let attempt = steps::generate::run(
            &store,
            gemini.as_ref(),
            veo.as_ref(),
            replicate.as_ref(),
            &session_dir,
        )
        .await;
        match attempt {
            Ok(()) => break,
            Err(err) if err.retryable() && confirm_retry(&err) => {
                steps::generate::retry(&store);
            }
            Err(err) => return Err(err),
        }
    }

    println!("Step 4/4: your memory is ready");
    let exports = steps::complete::run(&store, &args.output_dir).await;
    echo.abort();

    if let Some(video) = exports.video {
        println!("\nSaved video:  {}", video.display());
    }
    if let Some(poster) = exports.poster {
        println!("Saved poster: {}", poster.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let _logging_guards = init_logging();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|value| value.as_str()).unwrap_or("");

    let settings_store = SettingsStore::new(CONFIG.home_dir.clone());
    let exit_code = match command {
        "create" => match parse_create_args(&args) {
            Ok(create_args) => match run_wizard(create_args).await {
                Ok(()) => 0,
                Err(err) => {
                    error!("Wizard failed: {err}");
                    eprintln!("\n{err}");
                    if err.retryable() {
                        eprintln!("This looks temporary; running the command again may succeed.");
                    }
                    1
                }
            },
            Err(err) => {
                eprintln!("{err}");
                2
            }
        },
        "set-credential" => {
            let provider = args.get(2).map(|v| v.as_str()).unwrap_or("");
            let key = args.get(3).map(|v| v.as_str()).unwrap_or("");
            if provider.is_empty() || key.is_empty() {
                eprintln!("{}", usage());
                2
            } else {
                match settings_store.set_credential(provider, key) {
                    Ok(()) => {
                        info!("Stored {provider} credential");
                        println!("Stored {provider} credential.");
                        0
                    }
                    Err(err) => {
                        eprintln!("{err}");
                        1
                    }
                }
            }
        }
        "set-note" => {
            let note = args[2..].join(" ");
            if note.trim().is_empty() {
                eprintln!("{}", usage());
                2
            } else {
                match settings_store.set_note(Some(note.trim())) {
                    Ok(()) => {
                        println!("Note saved.");
                        0
                    }
                    Err(err) => {
                        eprintln!("{err}");
                        1
                    }
                }
            }
        }
        "clear-note" => match settings_store.set_note(None) {
            Ok(()) => {
                println!("Note cleared.");
                0
            }
            Err(err) => {
                eprintln!("{err}");
                1
            }
        },
        "reset" => {
            let session = settings_store.session_dir();
            match std::fs::remove_dir_all(&session) {
                Ok(()) => {
                    println!("Session cleared; credentials preserved.");
                    0
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    println!("Nothing to clear.");
                    0
                }
                Err(err) => {
                    eprintln!("Failed to clear session: {err}");
                    1
                }
            }
        }
        _ => {
            eprintln!("{}", usage());
            2
        }
    };

    std::process::exit(exit_code);
}
