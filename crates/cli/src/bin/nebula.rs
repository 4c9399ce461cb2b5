use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    nebula_cli::main_entry().await
}
