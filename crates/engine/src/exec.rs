//! Executor contract: schedules chain computations off the caller's
//! stack and hands back a completion handle with failure propagation.

use tokio::sync::oneshot;

use assetmill_core::nut::Nut;
use assetmill_core::{MillError, Result};

/// A zero-argument pipeline computation.
pub type Job = Box<dyn FnOnce() -> Result<Vec<Nut>> + Send + 'static>;

/// Handle on a scheduled computation. Waiting surfaces the job's own
/// failure; a dropped executor surfaces a cancellation error instead.
pub struct Completion {
    rx: oneshot::Receiver<Result<Vec<Nut>>>,
}

impl Completion {
    pub async fn wait(self) -> Result<Vec<Nut>> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(MillError::Cancelled),
        }
    }
}

pub trait Executor: Send + Sync {
    /// Schedules the job and returns its completion handle.
    fn spawn(&self, job: Job) -> Completion;
}

/// Default executor: runs jobs on the tokio blocking pool, which is
/// where synchronous chain execution belongs.
pub struct TokioExecutor;

impl Executor for TokioExecutor {
    fn spawn(&self, job: Job) -> Completion {
        let (tx, rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            // A dropped receiver means nobody waits for the result.
            let _ = tx.send(job());
        });

        Completion { rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_surfaces_job_result() {
        let executor = TokioExecutor;
        let nut = Nut::from_bytes("a.js", b"x".to_vec()).unwrap();
        let moved = nut.clone();

        let done = executor.spawn(Box::new(move || Ok(vec![moved])));
        let nuts = done.wait().await.unwrap();
        assert_eq!(nuts[0].name(), "a.js");
    }

    #[tokio::test]
    async fn completion_surfaces_job_failure() {
        let executor = TokioExecutor;
        let done = executor.spawn(Box::new(|| {
            Err(MillError::Inconsistency("boom".to_string()))
        }));

        match done.wait().await {
            Err(MillError::Inconsistency(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
