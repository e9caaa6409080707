//! Limiting the number of concurrent CPU-bound external processes.

use std::sync::LazyLock;

use tokio::sync::Semaphore;

use crate::prelude::*;

/// Semaphore limiting concurrent `pdftocairo` and `tesseract` processes.
///
/// A burst of simultaneous uploads must not fork more CPU-hungry child
/// processes than the machine has cores.
static CPU_SEMAPHORE: LazyLock<Semaphore> =
    LazyLock::new(|| Semaphore::new(num_cpus::get()));

/// Call an async function while holding a permit from the CPU semaphore.
///
/// Use this around external processes that each want 100% of a core. Plain
/// in-process blocking work should go through `spawn_blocking` instead, which
/// has its own pool limit.
#[instrument(level = "trace", skip_all)]
pub async fn with_cpu_semaphore<Func, Fut, R>(f: Func) -> Result<R>
where
    Func: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let permit = CPU_SEMAPHORE
        .acquire()
        .await
        .context("could not acquire CPU permit")?;
    let result = f().await;
    drop(permit);
    result
}
