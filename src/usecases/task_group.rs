//! Task Group - Concurrent Tasks Sharing One Cancellation Scope
//!
//! Every task runs on a shared `JoinSet` under a child token of the
//! caller's scope. The first task to fail with anything other than
//! `RouterError::Cancelled` cancels the scope for its siblings and
//! becomes the group's result.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::RouterError;

type FirstError = Arc<Mutex<Option<RouterError>>>;

/// Fixed set of tasks with first-error capture.
pub struct TaskGroup {
  tasks: JoinSet<()>,
  cancel: CancellationToken,
  first_error: FirstError,
}

impl TaskGroup {
  /// New group whose scope is cancelled together with `parent`.
  pub fn new(parent: &CancellationToken) -> Self {
    Self {
      tasks: JoinSet::new(),
      cancel: parent.child_token(),
      first_error: Arc::default(),
    }
  }

  /// The group's cancellation scope.
  pub fn token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Spawn `task` into the group.
  pub fn spawn<F>(&mut self, name: &'static str, task: F)
  where
    F: Future<Output = Result<(), RouterError>> + Send + 'static,
  {
    let cancel = self.cancel.clone();
    let first_error = Arc::clone(&self.first_error);

    self.tasks.spawn(async move {
      match task.await {
        Ok(()) => debug!(task = name, "Task finished"),
        Err(e) if e.is_cancelled() => debug!(task = name, "Task cancelled"),
        Err(e) => {
          error!(task = name, error = %e, "Task failed");
          record(&first_error, e);
          cancel.cancel();
        }
      }
    });
  }

  /// Wait for every task, returning the first real error.
  pub async fn wait(mut self) -> Result<(), RouterError> {
    while let Some(joined) = self.tasks.join_next().await {
      if let Err(e) = joined {
        error!(error = %e, "Task aborted");
        record(
          &self.first_error,
          RouterError::Task(anyhow::Error::new(e)),
        );
        self.cancel.cancel();
      }
    }

    let first = self
      .first_error
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    first.map_or(Ok(()), Err)
  }
}

fn record(slot: &FirstError, error: RouterError) {
  let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
  if slot.is_none() {
    *slot = Some(error);
  }
}
