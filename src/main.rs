use anyhow::Result;
use edumesh::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
