//! Task Supervision
//!
//! Runs the long-lived parts of one process side by side. The first part that fails (or panics)
//! cancels the shared token, so its siblings shut down cooperatively, and its error is returned.

use anyhow::{anyhow, Result};
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct Supervisor {
    tasks: JoinSet<(String, Result<()>)>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel,
        }
    }

    pub fn spawn<F>(&mut self, name: &str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.to_string();
        self.tasks.spawn(async move { (name, task.await) });
    }

    /// Waits for every task. Returns the first failure, after cancelling the others and waiting
    /// for them to stop.
    pub async fn wait(mut self) -> Result<()> {
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            let failure = match joined {
                Ok((name, Ok(()))) => {
                    tracing::info!("{} finished", name);
                    None
                }
                Ok((name, Err(e))) => Some(e.context(format!("{} failed", name))),
                Err(e) => Some(anyhow!("task panicked: {}", e)),
            };

            if let Some(e) = failure {
                tracing::error!("{:#}", e);
                self.cancel.cancel();
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Supervisor;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_stops_the_siblings() {
        // ARRANGE: a service that runs until cancelled, and one that fails right away
        let cancel = CancellationToken::new();
        let mut supervisor = Supervisor::new(cancel.clone());
        let service_cancel = cancel.clone();
        supervisor.spawn("consumer", async move {
            service_cancel.cancelled().await;
            Ok::<(), anyhow::Error>(())
        });
        supervisor.spawn("api", async { Err::<(), _>(anyhow::anyhow!("address in use")) });

        // ACT
        let result = tokio::time::timeout(Duration::from_secs(5), supervisor.wait())
            .await
            .unwrap();

        // ASSERT
        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("api failed"));
        assert!(format!("{:#}", err).contains("address in use"));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_finished_tasks_do_not_cancel_the_rest() {
        let cancel = CancellationToken::new();
        let mut supervisor = Supervisor::new(cancel.clone());
        supervisor.spawn("ingest", async { Ok::<(), anyhow::Error>(()) });
        let trigger = cancel.clone();
        supervisor.spawn("consumer", async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(!trigger.is_cancelled());
            Ok::<(), anyhow::Error>(())
        });

        supervisor.wait().await.unwrap();

        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let mut supervisor = Supervisor::new(CancellationToken::new());
        supervisor.spawn("broken", async {
            if true {
                panic!("boom");
            }
            Ok::<(), anyhow::Error>(())
        });

        assert!(supervisor.wait().await.is_err());
    }
}
