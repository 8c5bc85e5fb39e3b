use crate::{Error, Result};
use futures_util::{
    FutureExt,
    future::{BoxFuture, join_all},
};
use std::fmt;

pub type Job = BoxFuture<'static, Result<()>>;

/// Runs a batch of independent jobs to completion and reports every outcome,
/// in submission order.
pub trait Executor: fmt::Debug + Send + Sync {
    fn gather(&self, jobs: Vec<Job>) -> BoxFuture<'static, Vec<Result<()>>>;
}

/// One job after the other.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sequential;

impl Executor for Sequential {
    fn gather(&self, jobs: Vec<Job>) -> BoxFuture<'static, Vec<Result<()>>> {
        async move {
            let mut results = Vec::with_capacity(jobs.len());
            for job in jobs {
                results.push(job.await);
            }

            results
        }
        .boxed()
    }
}

/// All jobs polled concurrently on the calling task.
#[derive(Clone, Copy, Debug, Default)]
pub struct Joined;

impl Executor for Joined {
    fn gather(&self, jobs: Vec<Job>) -> BoxFuture<'static, Vec<Result<()>>> {
        join_all(jobs).boxed()
    }
}

/// Every job spawned as its own tokio task, then joined.
#[derive(Clone, Copy, Debug, Default)]
pub struct Spawned;

impl Executor for Spawned {
    fn gather(&self, jobs: Vec<Job>) -> BoxFuture<'static, Vec<Result<()>>> {
        async move {
            let handles: Vec<_> = jobs.into_iter().map(tokio::spawn).collect();

            join_all(handles)
                .await
                .into_iter()
                .map(|joined| joined.unwrap_or_else(|err| Err(Error::Task(err.to_string()))))
                .collect()
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValidationError;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn jobs(counter: &Arc<AtomicUsize>) -> Vec<Job> {
        (0..4)
            .map(|index| {
                let counter = Arc::clone(counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if index % 2 == 0 {
                        Ok(())
                    } else {
                        Err(ValidationError::new(format!("job {index}")).into())
                    }
                }
                .boxed()
            })
            .collect()
    }

    async fn check(executor: &dyn Executor) {
        let counter = Arc::new(AtomicUsize::new(0));
        let results = executor.gather(jobs(&counter)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(
            results.iter().map(Result::is_ok).collect::<Vec<_>>(),
            vec![true, false, true, false]
        );
    }

    #[tokio::test]
    async fn every_executor_runs_all_jobs() {
        check(&Sequential).await;
        check(&Joined).await;
        check(&Spawned).await;
    }

    #[tokio::test]
    async fn panicking_task_is_reported() {
        let job: Job = async { panic!("boom") }.boxed();
        let results = Spawned.gather(vec![job]).await;

        assert!(matches!(results.as_slice(), [Err(Error::Task(_))]));
    }
}
