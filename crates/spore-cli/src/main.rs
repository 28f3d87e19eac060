#[tokio::main]
async fn main() -> anyhow::Result<()> {
    spore_cli::run().await
}
