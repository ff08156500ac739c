pub mod http;
pub mod interpolation;
pub mod text_processing;

pub use http::*;
pub use interpolation::{InterpolationError, interpolate_credentials, interpolate_string};
pub use text_processing::redact_sensitive;
