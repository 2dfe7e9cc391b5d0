use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    fleet_context::logging::init();
    fleet_context::run().await
}
