use api_job_queue::*;
use async_trait::async_trait;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct ApiClient {
    base_url: String,
}

struct StarSource {
    source_uuid: String,
    starred: bool,
}

#[async_trait]
impl ApiCall<ApiClient, ()> for StarSource {
    type Output = String;

    async fn call_api(&self, client: &ApiClient, _session: &mut ()) -> Result<String, ApiError> {
        println!(
            "POST {}/sources/{}/star (starred={})",
            client.base_url, self.source_uuid, self.starred
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(self.source_uuid.clone())
    }
}

struct SendReply {
    source_uuid: String,
    body: String,
}

#[async_trait]
impl ApiCall<ApiClient, ()> for SendReply {
    type Output = String;

    async fn call_api(&self, client: &ApiClient, _session: &mut ()) -> Result<String, ApiError> {
        println!(
            "POST {}/sources/{}/replies ({} bytes)",
            client.base_url,
            self.source_uuid,
            self.body.len()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(format!("reply-for-{}", self.source_uuid))
    }

    fn priority(&self) -> JobPriority {
        JobPriority::SEND_REPLY
    }
}

#[tokio::main]
async fn main() -> Result<(), QueueError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let queue = ApiJobQueue::new(QueueConfig::default(), || Ok::<_, QueueError>(()));
    queue.login(ApiClient {
        base_url: "https://api.example.org".to_string(),
    });

    // Hold both lanes while queueing so priority alone decides the order
    queue.pause_queues()?;

    let star = queue.enqueue(StarSource {
        source_uuid: "a1".into(),
        starred: true,
    })?;
    let reply = queue.enqueue(SendReply {
        source_uuid: "b2".into(),
        body: "Thanks for reaching out".into(),
    })?;

    println!("Star update queued at default priority");
    println!("Reply queued at SEND_REPLY priority, runs first");
    println!();

    queue.resume_queues();

    match reply.await?.into_result() {
        Ok(uuid) => println!("Reply sent: {}", uuid),
        Err(e) => println!("Reply failed: {}", e),
    }
    match star.await?.into_result() {
        Ok(uuid) => println!("Source starred: {}", uuid),
        Err(e) => println!("Star failed: {}", e),
    }

    queue.shutdown();
    Ok(())
}
