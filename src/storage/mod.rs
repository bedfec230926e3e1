use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use image::{ImageFormat, ImageReader};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Local filesystem area holding uploads and produced artifacts.
pub trait FileStore: Send + Sync {
    /// True when the file exists and decodes as jpeg, png, gif or webp.
    fn is_image(&self, path: &Path) -> bool;
    /// Fresh, unique path for a new artifact. Nothing is created on disk.
    fn temp_path(&self, extension: &str) -> PathBuf;
    /// Idempotent: a missing path counts as deleted.
    fn delete(&self, path: &Path) -> bool;
}

pub const SUPPORTED_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::WebP,
];

const THUMBNAIL_MAX_EDGE: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_bytes: u64,
    pub min_dimension: u32,
    pub max_dimension: u32,
}

impl UploadLimits {
    pub fn with_max_megabytes(max_mb: u64) -> Self {
        Self {
            max_bytes: max_mb * 1024 * 1024,
            ..Self::default()
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_bytes: 25 * 1024 * 1024,
            min_dimension: 10,
            max_dimension: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub mime: String,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File too large. Maximum size is {max_mb} MB")]
    TooLarge { max_mb: u64 },
    #[error("Unsupported file type: {0}. Allowed types: image/jpeg, image/png, image/gif, image/webp")]
    UnsupportedType(String),
    #[error("Image too small. Minimum dimensions are {min}x{min} pixels")]
    DimensionsTooSmall { min: u32 },
    #[error("Image too large. Maximum dimensions are {max}x{max} pixels")]
    DimensionsTooLarge { max: u32 },
    #[error("Invalid image file: {0}")]
    InvalidImage(#[source] image::ImageError),
    #[error("storage filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
    limits: UploadLimits,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(root.as_path())?;
        Ok(Self {
            root,
            limits: UploadLimits::default(),
        })
    }

    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn limits(&self) -> UploadLimits {
        self.limits
    }

    pub fn store_upload(
        &self,
        bytes: &[u8],
        original_name: &str,
    ) -> Result<StoredUpload, StorageError> {
        if bytes.len() as u64 > self.limits.max_bytes {
            return Err(StorageError::TooLarge {
                max_mb: self.limits.max_bytes / (1024 * 1024),
            });
        }
        let format = image::guess_format(bytes)
            .ok()
            .filter(|f| SUPPORTED_FORMATS.contains(f))
            .ok_or_else(|| {
                StorageError::UnsupportedType(mime_for_path(Path::new(original_name)))
            })?;
        let (width, height) = ImageReader::with_format(Cursor::new(bytes), format)
            .into_dimensions()
            .map_err(StorageError::InvalidImage)?;
        self.check_dimensions(width, height)?;

        let id = format!("file_{}", Uuid::new_v4().simple());
        let extension = format.extensions_str().first().copied().unwrap_or("jpg");
        let path = self.root.join(format!("{id}.{extension}"));
        fs::write(path.as_path(), bytes)?;
        debug!(path = %path.display(), width, height, "stored upload");

        Ok(StoredUpload {
            id,
            name: display_name(original_name, extension),
            size: bytes.len() as u64,
            mime: format.to_mime_type().to_string(),
            path,
        })
    }

    fn check_dimensions(&self, width: u32, height: u32) -> Result<(), StorageError> {
        if width < self.limits.min_dimension || height < self.limits.min_dimension {
            return Err(StorageError::DimensionsTooSmall {
                min: self.limits.min_dimension,
            });
        }
        if width > self.limits.max_dimension || height > self.limits.max_dimension {
            return Err(StorageError::DimensionsTooLarge {
                max: self.limits.max_dimension,
            });
        }
        Ok(())
    }

    /// Writes a PNG thumbnail fitting 200x200 next to the image.
    pub fn generate_thumbnail(&self, image_path: &Path) -> Result<PathBuf, StorageError> {
        let img = image::open(image_path).map_err(StorageError::InvalidImage)?;
        let thumb = img.thumbnail(THUMBNAIL_MAX_EDGE, THUMBNAIL_MAX_EDGE);
        let stem = image_path
            .file_stem()
            .and_then(|v| v.to_str())
            .unwrap_or("image");
        let thumb_path = image_path.with_file_name(format!("{stem}_thumb.png"));
        thumb
            .save_with_format(thumb_path.as_path(), ImageFormat::Png)
            .map_err(StorageError::InvalidImage)?;
        Ok(thumb_path)
    }

    /// Removes non-hidden files older than `ttl`, returning how many were deleted.
    pub fn cleanup_expired(&self, ttl: Duration) -> Result<usize, StorageError> {
        let threshold = SystemTime::now()
            .checked_sub(ttl)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0usize;
        for entry in fs::read_dir(self.root.as_path())? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified()?;
            if modified < threshold && self.delete(entry.path().as_path()) {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl FileStore for LocalFileStore {
    fn is_image(&self, path: &Path) -> bool {
        let Ok(reader) = ImageReader::open(path).and_then(ImageReader::with_guessed_format) else {
            return false;
        };
        if !reader
            .format()
            .map(|f| SUPPORTED_FORMATS.contains(&f))
            .unwrap_or(false)
        {
            return false;
        }
        reader.into_dimensions().is_ok()
    }

    fn temp_path(&self, extension: &str) -> PathBuf {
        let ext = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        let ext = if ext.is_empty() { String::from("jpg") } else { ext };
        self.root
            .join(format!("temp_{}.{ext}", Uuid::new_v4().simple()))
    }

    fn delete(&self, path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to delete file");
                false
            }
        }
    }
}

fn display_name(original_name: &str, extension: &str) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .and_then(|v| v.to_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("image");
    format!("{stem}.{extension}")
}

pub fn mime_for_path(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|v| v.to_str())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => String::from("image/png"),
        "jpg" | "jpeg" => String::from("image/jpeg"),
        "webp" => String::from("image/webp"),
        "gif" => String::from("image/gif"),
        "bmp" => String::from("image/bmp"),
        "tif" | "tiff" => String::from("image/tiff"),
        _ => String::from("application/octet-stream"),
    }
}
