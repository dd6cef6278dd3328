mod abilities;
mod access_tokens;
mod event_logs;
mod instance_tokens;
mod instances;
mod usage_events;
mod users;

pub use abilities::AbilityRepo;
pub use access_tokens::AccessTokenRepo;
pub use event_logs::EventLogRepo;
pub use instance_tokens::InstanceTokenRepo;
pub use instances::InstanceRepo;
pub use usage_events::UsageEventRepo;
pub use users::UserRepo;
