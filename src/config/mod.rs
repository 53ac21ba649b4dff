use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8471";
const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
const DEFAULT_STATE_DIR: &str = "./state";

/// Process-level configuration, loaded once at startup from the
/// environment. Per-workspace settings live in the config store instead.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bot_token: String,
    pub state_dir: PathBuf,
    pub listen_addr: String,
    pub api_base: String,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        dotenv().ok();

        let bot_token =
            env::var("MODBOT_TOKEN").map_err(|_| anyhow::anyhow!("MODBOT_TOKEN is not set"))?;

        Ok(Self {
            bot_token,
            state_dir: env::var("MODBOT_STATE_DIR")
                .unwrap_or_else(|_| DEFAULT_STATE_DIR.to_string())
                .into(),
            listen_addr: env::var("MODBOT_LISTEN_ADDR")
                .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string()),
            api_base: env::var("MODBOT_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
        })
    }
}
