use api_job_queue::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct ApiClient {
    token: String,
    revoked: Arc<AtomicBool>,
}

struct SyncMetadata;

#[async_trait]
impl ApiCall<ApiClient, ()> for SyncMetadata {
    type Output = usize;

    async fn call_api(&self, client: &ApiClient, _session: &mut ()) -> Result<usize, ApiError> {
        if client.revoked.load(Ordering::SeqCst) {
            return Err(ApiError::Auth(format!("token {} expired", client.token)));
        }
        println!("Synced metadata with token {}", client.token);
        Ok(3)
    }

    fn priority(&self) -> JobPriority {
        JobPriority::METADATA_SYNC
    }
}

#[tokio::main]
async fn main() -> Result<(), QueueError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let queue = ApiJobQueue::new(QueueConfig::default(), || Ok::<_, QueueError>(()));
    let mut events = queue.subscribe();

    let revoked = Arc::new(AtomicBool::new(true));
    queue.login(ApiClient {
        token: "stale".into(),
        revoked: Arc::clone(&revoked),
    });

    let sync = queue.enqueue(SyncMetadata)?;

    // The first attempt hits an expired token and halts every lane
    loop {
        let event = events.recv().await.map_err(|e| QueueError::Other(e.to_string()))?;
        println!("event: {}", event.name());
        if let QueueEvent::SessionLost(lost) = event {
            println!("Session lost on lane {} (episode {})", lost.lane, lost.episode);
            break;
        }
    }

    println!("Logging in again...");
    queue.login(ApiClient {
        token: "fresh".into(),
        revoked: Arc::new(AtomicBool::new(false)),
    });

    let synced = sync.await?.into_result().map_err(|e| QueueError::Other(e.to_string()))?;
    println!("Sync finished with {} sources", synced);

    queue.shutdown();
    Ok(())
}
