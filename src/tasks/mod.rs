//! The built-in leaf tasks.
//!
//! Each task is a plain struct built from the [`Config`](crate::Config) (and
//! any shared state it needs) and implements [`TaskBody`](crate::TaskBody).

mod assets;
mod bundle;
mod clean;
mod server;
mod sourcemap;
mod styles;
mod watch;

pub use assets::{AssetError, Assets};
pub use bundle::{Bundle, BundleError};
pub use clean::{Clean, CleanError};
pub use server::{Serve, ServeError};
pub use styles::{StyleError, Styles};
pub use watch::{Subscription, Watch};
