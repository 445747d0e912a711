mod api_doc;
mod auth;
mod dto;
mod error;
mod handlers;
mod services;
mod setup;
mod state;
mod task_handlers;
mod telemetry;

use picshelf_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();
    telemetry::init_telemetry()?;

    let config = Config::from_env()?;

    let (state, router) = setup::initialize_app(config).await?;

    setup::server::start_server(state, router).await?;

    Ok(())
}
