//! Image Ingestion Pipeline
//!
//! Turns untrusted upload bytes into a metadata-free file in the upload
//! directory. Only decoded pixels survive: the original container (EXIF,
//! GPS, comments, ancillary chunks) never reaches the encoder.
//!
//! Stages, in order:
//! 1. size / count caps (before any decode work)
//! 2. content sniffing against the JPEG / PNG / GIF allow-list
//! 3. bounded decode with the format's own decoder
//! 4. random storage name with the canonical extension
//! 5. re-encode straight into a newly created file, removed on failure

pub mod pipeline;
pub mod sniff;

pub use pipeline::{ImagePipeline, PipelineConfig, StoredImage};
pub use sniff::sniff;
