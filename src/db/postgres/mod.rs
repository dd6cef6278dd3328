mod abilities;
mod access_tokens;
mod event_logs;
mod instance_tokens;
mod instances;
mod usage_events;
mod users;

pub use abilities::PostgresAbilityRepo;
pub use access_tokens::PostgresAccessTokenRepo;
pub use event_logs::PostgresEventLogRepo;
pub use instance_tokens::PostgresInstanceTokenRepo;
pub use instances::PostgresInstanceRepo;
pub use usage_events::PostgresUsageEventRepo;
pub use users::PostgresUserRepo;
