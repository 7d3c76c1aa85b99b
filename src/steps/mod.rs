pub mod complete;
pub mod enhance;
pub mod generate;
pub mod upload;

use std::sync::Arc;
use std::time::Duration;

use crate::config::CONFIG;
use crate::store::{Step, WorkflowStore};

/// The two delayed transitions of the enhance and generate steps: a short
/// pause so the finished state is visible before the wizard moves on.
pub async fn auto_advance(store: &Arc<WorkflowStore>, step: Step) -> bool {
    tokio::time::sleep(Duration::from_millis(CONFIG.auto_advance_ms)).await;
    store.advance_to(step)
}
