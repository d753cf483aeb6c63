// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::error;

pub type TaskResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Resolves when the first task of the set finishes. An empty set never
/// resolves, so it can sit in a `select!` next to sets that have tasks.
pub async fn wait_for_any_task(tasks: &mut JoinSet<TaskResult>) -> TaskResult {
    match tasks.join_next().await {
        None => std::future::pending().await,
        Some(res) => res?,
    }
}

pub async fn wait_for_tasks_with_timeout(
    tasks: &mut JoinSet<TaskResult>,
    timeout: Duration,
) -> TaskResult {
    wait_for_tasks_with_deadline(tasks, Instant::now() + timeout).await
}

/// Join every task of the set. The last task error wins; a missed deadline
/// is an error of its own and leaves the remaining tasks in the set.
pub async fn wait_for_tasks_with_deadline(
    tasks: &mut JoinSet<TaskResult>,
    stop_at: Instant,
) -> TaskResult {
    let mut result = Ok(());
    loop {
        match timeout_at(stop_at, tasks.join_next()).await {
            Err(_) => {
                result = Err(format!(
                    "timed out waiting for {} task(s) to complete",
                    tasks.len()
                )
                .into());
                break;
            }
            Ok(None) => break,
            Ok(Some(Ok(Ok(())))) => {}
            Ok(Some(Ok(Err(e)))) => result = Err(e),
            Ok(Some(Err(e))) => error!(error = ?e, "Failed to join with task"),
        }
    }

    result
}
