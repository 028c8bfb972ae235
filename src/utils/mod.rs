pub mod error;
pub mod template;

pub use error::{ErrorKind, WeiserError, WeiserResult};
pub use template::{expand_placeholders, template_vars};
