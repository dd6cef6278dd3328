mod error;
mod principal;

pub use error::AuthError;
pub use principal::Principal;
