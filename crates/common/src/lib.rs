pub mod error;
pub mod models;
pub mod token;

pub use error::{Error, Result, LINK_UNAVAILABLE_MESSAGE};
pub use models::{content_type_for, ImageKind, ImageRecord, ImageStatus, User};
