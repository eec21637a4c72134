use api_job_queue::*;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

struct ApiClient;

struct DownloadFile {
    file_uuid: String,
}

#[async_trait]
impl ApiCall<ApiClient, Connection> for DownloadFile {
    type Output = String;

    async fn call_api(
        &self,
        _client: &ApiClient,
        session: &mut Connection,
    ) -> Result<String, ApiError> {
        let path = format!("/tmp/downloads/{}.gpg", self.file_uuid);
        session
            .execute(
                "INSERT OR REPLACE INTO files (uuid, path) VALUES (?1, ?2)",
                params![self.file_uuid, path],
            )
            .map_err(ApiError::other)?;
        Ok(path)
    }

    fn priority(&self) -> JobPriority {
        JobPriority::DOWNLOAD
    }

    fn lane(&self) -> Lane {
        Lane::Downloads
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let db_path = PathBuf::from("client_demo.db");
    Connection::open(&db_path)?.execute_batch(
        "CREATE TABLE IF NOT EXISTS files (uuid TEXT PRIMARY KEY, path TEXT NOT NULL);",
    )?;

    let queue = ApiJobQueue::new(QueueConfig::default(), SqliteSessionMaker::new(&db_path));
    queue.login(ApiClient);

    let receivers = ["f-100", "f-101", "f-102"]
        .into_iter()
        .map(|uuid| {
            queue.enqueue(DownloadFile {
                file_uuid: uuid.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    for receiver in receivers {
        match receiver.await?.into_result() {
            Ok(path) => println!("Downloaded to {}", path),
            Err(e) => println!("Download failed: {}", e),
        }
    }

    let count: i64 = Connection::open(&db_path)?.query_row("SELECT COUNT(*) FROM files", [], |row| {
        row.get(0)
    })?;
    println!("{} files recorded in {}", count, db_path.display());

    queue.shutdown();
    Ok(())
}
