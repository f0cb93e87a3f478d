//! Security middleware: address anonymization for logs/exports, the standard
//! response security headers, and CORS origin allowlisting.

pub mod anonymize;
pub mod cors;
pub mod headers;

pub use anonymize::{anonymize_json, Anonymizer};
pub use cors::CorsPolicy;
pub use headers::{BASE_HEADERS, CACHE_CONTROL_NO_STORE};
