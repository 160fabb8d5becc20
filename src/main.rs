#[tokio::main]
async fn main() -> anyhow::Result<()> {
    comic_ingest_lib::run().await
}
