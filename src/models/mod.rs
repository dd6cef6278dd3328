mod ability;
mod event_log;
mod instance;
mod pagination;
mod token;
mod token_gen;
mod usage;
mod user;
mod validators;

pub use ability::*;
pub use event_log::*;
pub use instance::*;
pub use pagination::*;
pub use token::*;
pub use token_gen::*;
pub use usage::*;
pub use user::*;
pub use validators::*;
