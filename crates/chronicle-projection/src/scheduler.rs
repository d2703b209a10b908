//! Timer-driven execution of a polling projection.

use std::fmt;
use std::sync::Arc;

use chronicle_core::handler::HandlerChannel;
use tokio::sync::watch;

use crate::executor::{ExecutionOutcome, ProjectionExecutor};

/// Drives one executor until it is stopped, deleted or shut down.
pub struct PollingScheduler {
    executor: Arc<ProjectionExecutor>,
    channel: Arc<dyn HandlerChannel>,
}

impl fmt::Debug for PollingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingScheduler")
            .field("projection", &self.executor.name())
            .finish_non_exhaustive()
    }
}

impl PollingScheduler {
    #[must_use]
    pub fn new(executor: Arc<ProjectionExecutor>, channel: Arc<dyn HandlerChannel>) -> Self {
        Self { executor, channel }
    }

    /// Polls until the projection stops or is deleted, returning that
    /// outcome, or until `shutdown` turns `true`, returning `None`.
    ///
    /// A pass that advanced the checkpoint is followed immediately by the
    /// next one. Idle, locked and failed passes wait for the configured sleep
    /// interval; failures are logged and retried.
    #[tracing::instrument(skip(self, shutdown), fields(projection = %self.executor.name()))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Option<ExecutionOutcome> {
        let sleep = self.executor.setup().options().sleep();

        if self.executor.running().initializes_on_startup()
            && let Err(e) = self.executor.initialize(self.channel.as_ref()).await
        {
            tracing::error!(error = %e, "projection initialization failed, will retry");
        }

        loop {
            if *shutdown.borrow() {
                tracing::info!("polling stopped by shutdown");
                return None;
            }

            match self.executor.execute(self.channel.as_ref()).await {
                Ok(outcome @ (ExecutionOutcome::Stopped | ExecutionOutcome::Deleted)) => {
                    tracing::info!(?outcome, "polling finished");
                    return Some(outcome);
                }
                Ok(ExecutionOutcome::Processed { events }) if events > 0 => continue,
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "projection run failed, will retry"),
            }

            tokio::select! {
                () = tokio::time::sleep(sleep) => {}
                _ = shutdown.changed() => {
                    tracing::info!("polling stopped by shutdown");
                    return None;
                }
            }
        }
    }
}
