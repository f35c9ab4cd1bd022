#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pairwire_server::run().await
}
