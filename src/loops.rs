//! Periodic execution of a fallible task with cancellation.

use std::time::Duration;

use futures::Future;

use crate::context::Shutdown;
use crate::error::Result;

/// Default period between two ticks of a control loop.
pub const DEFAULT_LOOP_DURATION: Duration = Duration::from_secs(60);

/// Runs `task` forever with `period` between the end of one tick and the
/// start of the next, so ticks never overlap and a slow tick simply delays
/// the next one. Non-fatal errors are logged and the loop keeps going;
/// a fatal error stops it. Tripping the shutdown signal cancels the
/// in-flight tick at its next await point and returns cleanly.
pub async fn run_loop<F, Fut>(
    mut shutdown: Shutdown,
    period: Duration,
    name: &str,
    mut task: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    tracing::debug!("starting {} loop with a {:?} period", name, period);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("{} loop shutting down", name);
                return Ok(());
            }
            result = task() => match result {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    tracing::error!("{} loop hit a fatal error: {}", name, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("{} loop tick failed: {}", name, e);
                }
            }
        }
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("{} loop shutting down", name);
                return Ok(());
            }
            _ = tokio::time::sleep(period) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::error::Error;
    use crate::test_utils::test_context;

    #[tokio::test(start_paused = true)]
    async fn ticks_repeat_on_the_period() {
        let ctx = test_context();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counted = ticks.clone();
        let shutdown_ctx = ctx.clone();
        let handle = tokio::spawn(run_loop(
            ctx.shutdown_signal(),
            Duration::from_secs(60),
            "test",
            move || {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        ));
        // three full periods pass: the first tick plus three more
        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 4);
        shutdown_ctx.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn non_fatal_errors_do_not_stop_the_loop() {
        let ctx = test_context();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counted = ticks.clone();
        let shutdown_ctx = ctx.clone();
        let handle = tokio::spawn(run_loop(
            ctx.shutdown_signal(),
            Duration::from_secs(60),
            "test",
            move || {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Generic("rpc down"))
                }
            },
        ));
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert!(ticks.load(Ordering::SeqCst) >= 2);
        shutdown_ctx.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_stop_the_loop() {
        let ctx = test_context();
        let result = run_loop(
            ctx.shutdown_signal(),
            Duration::from_secs(60),
            "test",
            || async { Err(Error::MissingSecrets) },
        )
        .await;
        assert!(matches!(result, Err(Error::MissingSecrets)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_the_sleep() {
        let ctx = test_context();
        let shutdown_ctx = ctx.clone();
        let handle = tokio::spawn(run_loop(
            ctx.shutdown_signal(),
            Duration::from_secs(3600),
            "test",
            || async { Ok(()) },
        ));
        // let the first tick run, then trip the signal mid-sleep
        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown_ctx.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_a_stuck_tick() {
        let ctx = test_context();
        let shutdown_ctx = ctx.clone();
        let handle = tokio::spawn(run_loop(
            ctx.shutdown_signal(),
            Duration::from_secs(60),
            "test",
            || async {
                // a tick that never finishes on its own
                tokio::time::sleep(Duration::from_secs(u64::MAX / 2)).await;
                Ok(())
            },
        ));
        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown_ctx.shutdown();
        handle.await.unwrap().unwrap();
    }
}
