use once_cell::sync::Lazy;
use std::future::Future;
use std::sync::Mutex;
use tokio::runtime::{Builder, Runtime};

static TOKIO_RUNTIME: Lazy<Mutex<Runtime>> = Lazy::new(|| {
    Mutex::new(
        Builder::new_current_thread()
            .thread_name("deploy-core-blocking")
            .enable_all()
            .build()
            .expect("failed to build blocking tokio runtime"),
    )
});

/// Bridges the synchronous `DeployExecutor`/`JobMonitor` call sites into the
/// async Kubernetes/Helm operations they need to make.
pub fn block_on<F: Future>(future: F) -> F::Output {
    TOKIO_RUNTIME.lock().unwrap().block_on(future)
}
