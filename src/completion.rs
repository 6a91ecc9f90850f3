use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::queue::ClosableQueue;
use crate::worker::DownloadResult;

/// Drain the completion queue in the background, calling `handler` for every
/// result until the queue is closed. Results arrive in completion order, not
/// listing order. The task resolves to the number of results handled.
pub fn spawn_completion_consumer<F>(
    queue: Arc<ClosableQueue<DownloadResult>>,
    mut handler: F,
) -> JoinHandle<usize>
where
    F: FnMut(DownloadResult) + Send + 'static,
{
    tokio::spawn(async move {
        let mut handled = 0;
        while let Ok(result) = queue.recv().await {
            handler(result);
            handled += 1;
        }
        debug!(queue = queue.name(), handled, "Completion consumer finished");
        handled
    })
}
