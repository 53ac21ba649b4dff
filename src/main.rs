use log::info;
use std::sync::Arc;

use modbot::config::AppConfig;
use modbot::fabric::discord::DiscordFabric;
use modbot::interactions::configure_interaction_routes;
use modbot::shared::state::AppState;
use modbot::store::JsonFileStore;
use modbot::tickets::TicketManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = AppConfig::load()?;

    let fabric = Arc::new(DiscordFabric::new(&config.bot_token, &config.api_base));
    let bot_user_id = fabric
        .current_user()
        .await
        .map_err(|e| anyhow::anyhow!("could not identify the bot user: {e}"))?;
    info!("authenticated as user {bot_user_id}");

    let store = Arc::new(JsonFileStore::new(&config.state_dir));
    let manager = Arc::new(TicketManager::new(store.clone(), fabric, bot_user_id));

    let listen_addr = config.listen_addr.clone();
    let state = Arc::new(AppState {
        config,
        store,
        manager,
    });

    let app = configure_interaction_routes().with_state(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!("listening on {listen_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
