#[tokio::main]
async fn main() -> anyhow::Result<()> {
    convo_server::run().await
}
