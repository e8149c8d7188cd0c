//! Parallel fan-out: barrier-style helpers over tokio tasks.
//!
//! Every helper resolves only once all spawned units have finished. If a
//! unit panics, the remaining units are aborted and the panic is re-raised
//! in the caller.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;

/// Run every future on its own tokio task and wait for all of them.
///
/// ```ignore
/// parallel::run_all([
///     Box::pin(async { println!("task #1") }),
///     Box::pin(async { println!("task #2") }),
/// ]).await;
/// ```
pub async fn run_all<I, F>(futures: I)
where
    I: IntoIterator<Item = F>,
    F: Future<Output = ()> + Send + 'static,
{
    let mut set = JoinSet::new();
    for future in futures {
        set.spawn(future);
    }
    join(set).await;
}

/// Start exactly `k` workers sharing one counter. Each worker claims the
/// next index in `0..n` and awaits `work(index)` until the range is used
/// up. Every index is processed exactly once; which worker gets which index
/// is unspecified.
pub async fn run_workers<W, Fut>(k: usize, n: usize, work: W)
where
    W: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let next = Arc::new(AtomicUsize::new(0));
    let work = Arc::new(work);
    let mut set = JoinSet::new();
    for _ in 0..k {
        let next = Arc::clone(&next);
        let work = Arc::clone(&work);
        set.spawn(async move {
            loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                if index >= n {
                    break;
                }
                work(index).await;
            }
        });
    }
    join(set).await;
}

/// Spread `jobs` over one worker per logical CPU and wait for all of them.
pub async fn begin<I, F>(jobs: I)
where
    I: IntoIterator<Item = F>,
    F: Future<Output = ()> + Send + 'static,
{
    let slots: Arc<Vec<Mutex<Option<F>>>> =
        Arc::new(jobs.into_iter().map(|job| Mutex::new(Some(job))).collect());
    let cpus = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    let n = slots.len();
    run_workers(cpus.min(n), n, move |index| {
        let job = slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        async move {
            if let Some(job) = job {
                job.await;
            }
        }
    })
    .await;
}

async fn join(mut set: JoinSet<()>) {
    while let Some(joined) = set.join_next().await {
        if let Err(err) = joined
            && err.is_panic()
        {
            set.abort_all();
            std::panic::resume_unwind(err.into_panic());
        }
    }
}
