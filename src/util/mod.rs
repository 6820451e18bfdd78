//! Small helpers shared across modules.

mod url_validator;

pub use url_validator::{validate_url, UrlValidationError};
