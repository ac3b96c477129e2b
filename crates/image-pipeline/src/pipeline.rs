//! Validation, re-encoding and persistence of uploaded images

use glimpse_common::token::{self, STORED_NAME_BYTES};
use glimpse_common::{Error, ImageKind, Result};
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, DynamicImage, Frame, ImageReader, Limits};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Cursor, ErrorKind, Write};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::sniff::{image_format, sniff};

/// Default per-file cap (10 MiB)
pub const DEFAULT_MAX_FILE_SIZE: usize = 10 << 20;

/// Default number of files accepted in one upload
pub const DEFAULT_MAX_FILES: usize = 10;

/// Default cap on either image dimension
pub const DEFAULT_MAX_DIMENSION: u32 = 16_384;

/// Upper bound on decoder allocations (512 MiB)
const MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

/// Matches the default quality of common JPEG encoders
const JPEG_QUALITY: u8 = 75;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory receiving re-encoded files
    pub upload_dir: PathBuf,

    /// Largest accepted upload in bytes (inclusive)
    pub max_file_size: usize,

    /// Largest accepted batch
    pub max_files: usize,

    /// Largest accepted width or height in pixels
    pub max_dimension: u32,
}

impl PipelineConfig {
    /// Configuration with default caps
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_files: DEFAULT_MAX_FILES,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// Result of a successful ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// Random filename inside the upload directory
    pub stored_name: String,
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
    /// Size of the re-encoded file in bytes
    pub size: u64,
}

/// Image ingestion pipeline
#[derive(Debug, Clone)]
pub struct ImagePipeline {
    config: PipelineConfig,
}

impl ImagePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Absolute location of a stored file
    pub fn path_for(&self, stored_name: &str) -> PathBuf {
        self.config.upload_dir.join(stored_name)
    }

    /// Reject a whole batch before any file is decoded
    pub fn check_batch(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::NoFiles);
        }
        if count > self.config.max_files {
            return Err(Error::TooManyFiles {
                count,
                max: self.config.max_files,
            });
        }
        Ok(())
    }

    /// Reject a single file by size before it is decoded
    pub fn check_size(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(Error::EmptyFile);
        }
        if len > self.config.max_file_size {
            return Err(Error::FileTooLarge {
                size: len,
                max: self.config.max_file_size,
            });
        }
        Ok(())
    }

    /// Validate, strip and persist one upload.
    ///
    /// On success exactly one new file exists in the upload directory. On
    /// any failure nothing is left behind.
    pub fn ingest(&self, bytes: &[u8], declared_name: &str) -> Result<StoredImage> {
        self.check_size(bytes.len())?;

        let kind = sniff(bytes)?;
        debug!("Sniffed '{}' as {:?}", declared_name, kind);

        let decoded = self.decode(bytes, kind)?;
        let (width, height) = (decoded.width(), decoded.height());

        let stored_name = format!(
            "{}.{}",
            token::generate(STORED_NAME_BYTES)?,
            kind.extension()
        );
        let size = self.persist(&stored_name, &decoded, kind)?;

        info!(
            "Stored '{}' as {} ({}x{}, {} bytes)",
            declared_name, stored_name, width, height, size
        );

        Ok(StoredImage {
            stored_name,
            kind,
            width,
            height,
            size,
        })
    }

    /// Best-effort removal of a stored file; a missing file counts as removed
    pub fn remove(&self, stored_name: &str) -> Result<()> {
        match fs::remove_file(self.path_for(stored_name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::DeleteFailed(format!("{}: {}", stored_name, e))),
        }
    }

    fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.config.max_dimension);
        limits.max_image_height = Some(self.config.max_dimension);
        limits.max_alloc = Some(MAX_DECODE_ALLOC);
        limits
    }

    fn decode(&self, bytes: &[u8], kind: ImageKind) -> Result<DynamicImage> {
        let mut reader = ImageReader::with_format(Cursor::new(bytes), image_format(kind));
        reader.limits(self.limits());
        reader.decode().map_err(|e| Error::Decode(e.to_string()))
    }

    fn persist(&self, stored_name: &str, image: &DynamicImage, kind: ImageKind) -> Result<u64> {
        let path = self.path_for(stored_name);

        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::DuplicateStoredName);
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let mut writer = BufWriter::new(file);
        let written = encode(&mut writer, image, kind).and_then(|()| {
            writer
                .flush()
                .map_err(|e| Error::Encode(format!("flush failed: {}", e)))
        });
        drop(writer);

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&path) {
                warn!(
                    "Failed to remove partial file {}: {}",
                    path.display(),
                    cleanup
                );
            }
            return Err(e);
        }

        Ok(fs::metadata(&path)?.len())
    }
}

/// Encode decoded pixels in `kind`'s format. The encoder only ever sees the
/// pixel buffer and its dimensions.
fn encode<W: Write>(writer: &mut W, image: &DynamicImage, kind: ImageKind) -> Result<()> {
    let result = match kind {
        ImageKind::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(writer, JPEG_QUALITY);
            match image.color() {
                ColorType::L8 | ColorType::Rgb8 => image.write_with_encoder(encoder),
                _ => DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder),
            }
        }
        ImageKind::Png => image.write_with_encoder(PngEncoder::new(writer)),
        ImageKind::Gif => {
            // The trailer is written when the encoder is dropped at the end of this arm
            let mut encoder = GifEncoder::new(writer);
            encoder.encode_frame(Frame::new(image.to_rgba8()))
        }
    };
    result.map_err(|e| Error::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn pipeline(dir: &Path) -> ImagePipeline {
        ImagePipeline::new(PipelineConfig::new(dir))
    }

    #[test]
    fn test_check_batch_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());

        assert!(matches!(pipeline.check_batch(0), Err(Error::NoFiles)));
        assert!(pipeline.check_batch(1).is_ok());
        assert!(pipeline.check_batch(DEFAULT_MAX_FILES).is_ok());
        assert!(matches!(
            pipeline.check_batch(DEFAULT_MAX_FILES + 1),
            Err(Error::TooManyFiles { count: 11, max: 10 })
        ));
    }

    #[test]
    fn test_check_size_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::new(dir.path());
        config.max_file_size = 100;
        let pipeline = ImagePipeline::new(config);

        assert!(matches!(pipeline.check_size(0), Err(Error::EmptyFile)));
        assert!(pipeline.check_size(100).is_ok());
        assert!(matches!(
            pipeline.check_size(101),
            Err(Error::FileTooLarge { size: 101, max: 100 })
        ));
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        assert!(pipeline.remove("never-written.png").is_ok());
    }

    #[test]
    fn test_persist_refuses_existing_name() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        std::fs::write(dir.path().join("taken.png"), b"occupied").unwrap();

        let image = DynamicImage::new_rgb8(2, 2);
        let err = pipeline
            .persist("taken.png", &image, ImageKind::Png)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateStoredName));
        // The existing file is untouched
        assert_eq!(
            std::fs::read(dir.path().join("taken.png")).unwrap(),
            b"occupied"
        );
    }
}
