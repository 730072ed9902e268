use image::{ImageFormat, RgbImage};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("cannot identify image file: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to encode transient image: {0}")]
    Encode(image::ImageError),
    #[error("failed to write transient image: {0}")]
    Io(#[from] std::io::Error),
}

/// JPEG copy of an upload on disk, removed when dropped.
#[derive(Debug)]
pub struct TransientImage {
    path: PathBuf,
}

impl TransientImage {
    pub fn persist(image: &RgbImage, dir: &Path) -> Result<Self, IngestError> {
        let transient = Self {
            path: dir.join(format!("dermai-{}.jpg", Uuid::new_v4())),
        };
        // write_jpeg closes the file before returning.
        write_jpeg(image, &transient.path)?;
        Ok(transient)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransientImage {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed transient image {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Failed to remove transient image {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

fn write_jpeg(image: &RgbImage, path: &Path) -> Result<(), IngestError> {
    let mut writer = BufWriter::new(File::create(path)?);
    image
        .write_to(&mut writer, ImageFormat::Jpeg)
        .map_err(IngestError::Encode)?;
    writer.flush()?;
    Ok(())
}

/// Decodes raw upload bytes into a 3-channel RGB bitmap, whatever the source
/// color mode was.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, IngestError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

pub fn load_rgb(path: &Path) -> Result<RgbImage, IngestError> {
    Ok(image::open(path)?.to_rgb8())
}

/// Decodes an upload and materializes it in `dir`. The caller owns the file.
pub fn ingest(bytes: &[u8], dir: &Path) -> Result<TransientImage, IngestError> {
    let image = decode(bytes)?;
    TransientImage::persist(&image, dir)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
    use std::io::Cursor;

    pub(crate) fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    pub(crate) fn solid_jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, image::Rgb([180, 90, 60]));
        encode(DynamicImage::ImageRgb8(image), ImageFormat::Jpeg)
    }

    #[test]
    fn grayscale_and_alpha_inputs_become_rgb() {
        let gray = encode(
            DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 6, Luma([42]))),
            ImageFormat::Png,
        );
        let decoded = decode(&gray).unwrap();
        assert_eq!(decoded.dimensions(), (8, 6));
        assert_eq!(decoded.get_pixel(0, 0).0, [42, 42, 42]);

        let rgba = encode(
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 128]))),
            ImageFormat::Png,
        );
        assert_eq!(decode(&rgba).unwrap().get_pixel(3, 3).0, [10, 20, 30]);
    }

    #[test]
    fn empty_and_garbage_bytes_are_rejected() {
        assert!(matches!(decode(&[]), Err(IngestError::Decode(_))));
        assert!(matches!(decode(b"not an image"), Err(IngestError::Decode(_))));
    }

    #[test]
    fn transient_image_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let transient = ingest(&solid_jpeg(32, 32), dir.path()).unwrap();
        let path = transient.path().to_path_buf();

        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "jpg");
        assert_eq!(load_rgb(&path).unwrap().dimensions(), (32, 32));

        drop(transient);
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_uploads_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = solid_jpeg(16, 16);
        let a = ingest(&bytes, dir.path()).unwrap();
        let b = ingest(&bytes, dir.path()).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn failed_encode_leaves_no_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        // JPEG dimensions are limited to 16 bits.
        let too_wide = RgbImage::new(70_000, 1);

        let result = TransientImage::persist(&too_wide, dir.path());

        assert!(matches!(result, Err(IngestError::Encode(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_scratch_dir_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            ingest(&solid_jpeg(8, 8), &missing),
            Err(IngestError::Io(_))
        ));
    }
}
