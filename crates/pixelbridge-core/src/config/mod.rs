//! Bridge configuration: schema, JSON5 loading, validation, env overrides.

mod loader;
mod schema;

pub use loader::*;
pub use schema::*;
