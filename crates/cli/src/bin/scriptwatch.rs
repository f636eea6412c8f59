use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    scriptwatch_cli::main_entry().await
}
