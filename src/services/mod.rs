mod abilities;
mod charts;
mod event_logs;
mod ingestion;
mod instances;
mod tokens;
mod usage;
mod users;

use std::sync::Arc;

pub use abilities::{AbilityService, AbilityUpdate};
pub use charts::{
    ChartRow, ChartSeries, ChartService, DEFAULT_CHART_MODELS, UsageMatrix, UserUsageBars,
};
pub use event_logs::EventLogService;
pub use ingestion::{
    CompletionMessage, CompletionRequest, IngestError, IngestionService, MessageContent,
};
pub use instances::InstanceService;
pub use tokens::{AuthenticatedToken, TokenError, TokenService};
pub use usage::{DEFAULT_MODEL_PREFIX, UsageService};
pub use users::UserService;

use crate::{config::IngestionConfig, db::DbPool};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub users: UserService,
    pub instances: InstanceService,
    pub abilities: AbilityService,
    pub tokens: TokenService,
    pub usage: UsageService,
    pub charts: ChartService,
    pub ingestion: IngestionService,
    pub event_logs: EventLogService,
}

impl Services {
    pub fn new(db: Arc<DbPool>, ingestion: IngestionConfig) -> Self {
        let usage = UsageService::new(db.clone());
        let tokens = TokenService::new(db.clone());
        Self {
            users: UserService::new(db.clone()),
            instances: InstanceService::new(db.clone()),
            abilities: AbilityService::new(db.clone()),
            charts: ChartService::new(db.clone(), usage.clone()),
            ingestion: IngestionService::new(db.clone(), tokens.clone(), usage.clone(), ingestion),
            event_logs: EventLogService::new(db),
            tokens,
            usage,
        }
    }
}
