use tokio::io::{self, AsyncBufReadExt};

use crate::infrastructure::memory_queue::InMemoryQueue;

/// Publishes every non-empty stdin line onto the in-memory queue, then
/// closes it. Lines are not validated here: malformed ones are rejected by
/// the intake loop like any other bad payload.
pub async fn feed_from_stdin(queue: InMemoryQueue) -> anyhow::Result<u64> {
    let stdin = io::stdin();
    let mut reader = io::BufReader::new(stdin).lines();
    let mut published = 0;

    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        queue.publish(line.into_bytes())?;
        published += 1;
    }

    queue.close();
    tracing::info!(published, "stdin closed, no more events");
    Ok(published)
}
