mod abilities;
mod access_tokens;
mod common;
mod event_logs;
mod instance_tokens;
mod instances;
mod usage_events;
mod users;

pub use abilities::SqliteAbilityRepo;
pub use access_tokens::SqliteAccessTokenRepo;
pub use event_logs::SqliteEventLogRepo;
pub use instance_tokens::SqliteInstanceTokenRepo;
pub use instances::SqliteInstanceRepo;
pub use usage_events::SqliteUsageEventRepo;
pub use users::SqliteUserRepo;
