#[tokio::main]
async fn main() -> anyhow::Result<()> {
    timeline_engine_lib::run().await
}
