use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

/// Lifecycle contract for long-running parts of the bridge.
///
/// `configure` runs once; `start`/`run`/`stop` cycle until the process
/// exits, with a short backoff after failures.
#[async_trait]
pub trait Service: Send {
    type Error: Error + Send + 'static;

    async fn configure(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn start(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn run(&mut self) -> Result<(), Self::Error>;

    async fn stop(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Drive a service forever on its own task.
pub fn spawn<S>(name: &'static str, mut svc: S) -> JoinHandle<()>
where
    S: Service + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = svc.configure().await {
            log::error!("[{name}] configure failed: {err}");
            return;
        }

        loop {
            if let Err(err) = svc.start().await {
                log::error!("[{name}] start failed: {err}");
                tokio::time::sleep(RESTART_BACKOFF).await;
                continue;
            }

            match svc.run().await {
                Ok(()) => log::info!("[{name}] finished"),
                Err(err) => log::error!("[{name}] failed: {err}"),
            }

            if let Err(err) = svc.stop().await {
                log::warn!("[{name}] stop failed: {err}");
            }

            tokio::time::sleep(RESTART_BACKOFF).await;
        }
    })
}
