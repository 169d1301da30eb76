//! Data models for AlertRelay

mod alert;
mod incident;
mod notification;
mod query;
mod webhook;

pub use alert::*;
pub use incident::*;
pub use notification::*;
pub use query::*;
pub use webhook::*;
