pub mod error;
pub mod types;
pub mod value;

pub use error::{OrmError, Result};
pub use types::{ContextId, EntityKey, EntityRef};
pub use value::Value;
