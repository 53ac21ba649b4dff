use std::sync::Arc;

use crate::config::AppConfig;
use crate::store::ConfigStore;
use crate::tickets::TicketManager;

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn ConfigStore>,
    pub manager: Arc<TicketManager>,
}
