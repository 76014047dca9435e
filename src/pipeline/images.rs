//! Image asset management: decode, normalise and persist raw images.
//!
//! Every raw image from the extractor is decoded, re-encoded (JPEG stays
//! JPEG at quality 95, anything else becomes PNG) and written once under the
//! images directory. The result is an [`ImageMap`] from `origin_ref` to the
//! packaged file, built once and read-only afterwards.
//!
//! A single bad image never stops the others: it is logged and left out of
//! the map.

use crate::error::{AssetError, Pdf2EpubError};
use crate::pipeline::extract::{DocumentExtractor, RawImage, RawImageData};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// JPEG quality used when re-encoding JPEG-origin images.
pub const JPEG_QUALITY: u8 = 95;

/// A decoded image, as seen by the codec.
pub struct ImageAsset {
    pub origin_ref: String,
    pub image: DynamicImage,
    /// Encoding of the source bytes, when known.
    pub source_format: Option<ImageFormat>,
    pub pixel_dimensions: (u32, u32),
}

/// An image persisted for packaging.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PackagedImage {
    pub origin_ref: String,
    /// Bare file name, unique within the run.
    pub file_name: String,
    /// Path inside the content directory, e.g. `Images/page1_img0.png`.
    pub packaged_path: String,
    /// Reference used from page markup, e.g. `../Images/page1_img0.png`.
    pub href: String,
    pub media_type: &'static str,
    /// Where the encoded file lives on disk.
    pub disk_path: PathBuf,
    pub pixel_dimensions: (u32, u32),
}

/// Immutable `origin_ref → PackagedImage` mapping.
#[derive(Debug, Clone, Default)]
pub struct ImageMap {
    entries: BTreeMap<String, PackagedImage>,
    failed: usize,
}

impl ImageMap {
    pub fn get(&self, origin_ref: &str) -> Option<&PackagedImage> {
        self.entries.get(origin_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Images that could not be decoded, encoded or written.
    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackagedImage> {
        self.entries.values()
    }

    /// Build a map directly from already-persisted images.
    pub fn from_images(images: impl IntoIterator<Item = PackagedImage>) -> Self {
        Self {
            entries: images
                .into_iter()
                .map(|img| (img.origin_ref.clone(), img))
                .collect(),
            failed: 0,
        }
    }
}

/// Replace path-unsafe characters in `origin_ref` with `_`.
///
/// Keeps ASCII alphanumerics, `-`, `_` and `.`; leading/trailing
/// underscores and dots are trimmed. Returns `"image"` if nothing is left.
pub fn sanitize_ref(origin_ref: &str) -> String {
    let mapped: String = origin_ref
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        "image".to_string()
    } else {
        trimmed.to_string()
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff"];

fn strip_image_ext(origin_ref: &str) -> &str {
    match origin_ref.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && IMAGE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)) =>
        {
            stem
        }
        _ => origin_ref,
    }
}

/// Output encoding chosen for a source format.
fn target_format(source: Option<ImageFormat>) -> (ImageFormat, &'static str, &'static str) {
    match source {
        Some(ImageFormat::Jpeg) => (ImageFormat::Jpeg, "jpg", "image/jpeg"),
        _ => (ImageFormat::Png, "png", "image/png"),
    }
}

/// Decode raw extractor output into an [`ImageAsset`].
pub fn decode(raw: RawImage) -> Result<ImageAsset, AssetError> {
    let (image, source_format) = match raw.data {
        RawImageData::Decoded {
            image,
            source_format,
        } => (image, source_format),
        RawImageData::Encoded(bytes) => {
            let format = image::guess_format(&bytes).map_err(|e| AssetError::Decode {
                origin_ref: raw.origin_ref.clone(),
                detail: e.to_string(),
            })?;
            let image = image::load_from_memory_with_format(&bytes, format).map_err(|e| {
                AssetError::Decode {
                    origin_ref: raw.origin_ref.clone(),
                    detail: e.to_string(),
                }
            })?;
            (image, Some(format))
        }
    };
    let pixel_dimensions = (image.width(), image.height());
    if pixel_dimensions.0 == 0 || pixel_dimensions.1 == 0 {
        return Err(AssetError::Decode {
            origin_ref: raw.origin_ref,
            detail: "zero-sized image".into(),
        });
    }
    Ok(ImageAsset {
        origin_ref: raw.origin_ref,
        image,
        source_format,
        pixel_dimensions,
    })
}

/// Encode `asset` into its packaged format.
pub fn encode(asset: &ImageAsset) -> Result<(Vec<u8>, ImageFormat), AssetError> {
    let (format, _, _) = target_format(asset.source_format);
    let mut buf = Vec::new();
    let result = match format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgb8(asset.image.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY))
        }
        _ => asset.image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png),
    };
    result.map_err(|e| AssetError::Encode {
        origin_ref: asset.origin_ref.clone(),
        detail: e.to_string(),
    })?;
    Ok((buf, format))
}

/// Owns the images directory for one run and assigns unique file names.
pub struct ImageAssetManager {
    images_dir: PathBuf,
    used_names: HashSet<String>,
}

impl ImageAssetManager {
    pub fn new(images_dir: impl Into<PathBuf>) -> Self {
        Self {
            images_dir: images_dir.into(),
            used_names: HashSet::new(),
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Pick a file name for `origin_ref` not yet used in this run.
    ///
    /// An image extension already on `origin_ref` is dropped first, so
    /// `figure.png` becomes `figure.png` rather than `figure.png.png`.
    pub fn unique_name(&mut self, origin_ref: &str, ext: &str) -> String {
        let stem = sanitize_ref(strip_image_ext(origin_ref));
        let mut name = format!("{}.{}", stem, ext);
        let mut n = 1;
        while self.used_names.contains(&name) {
            name = format!("{}_{}.{}", stem, n, ext);
            n += 1;
        }
        self.used_names.insert(name.clone());
        name
    }

    /// Decode, encode and write one image.
    pub fn persist(&mut self, raw: RawImage) -> Result<PackagedImage, AssetError> {
        let asset = decode(raw)?;
        let (bytes, _) = encode(&asset)?;
        let (_, ext, media_type) = target_format(asset.source_format);

        let file_name = self.unique_name(&asset.origin_ref, ext);
        let disk_path = self.images_dir.join(&file_name);
        std::fs::write(&disk_path, &bytes).map_err(|e| AssetError::Write {
            origin_ref: asset.origin_ref.clone(),
            path: disk_path.clone(),
            detail: e.to_string(),
        })?;
        debug!(
            "{} → {} ({}x{}, {} bytes)",
            asset.origin_ref,
            file_name,
            asset.pixel_dimensions.0,
            asset.pixel_dimensions.1,
            bytes.len()
        );

        Ok(PackagedImage {
            origin_ref: asset.origin_ref,
            packaged_path: format!("Images/{}", file_name),
            href: format!("../Images/{}", file_name),
            file_name,
            media_type,
            disk_path,
            pixel_dimensions: asset.pixel_dimensions,
        })
    }

    /// Persist every image the extractor enumerates.
    ///
    /// Only an extractor failure is fatal. A duplicate `origin_ref` keeps the
    /// first image.
    pub fn extract(&mut self, extractor: &dyn DocumentExtractor) -> Result<ImageMap, Pdf2EpubError> {
        std::fs::create_dir_all(&self.images_dir).map_err(|source| Pdf2EpubError::WorkDir {
            path: self.images_dir.clone(),
            source,
        })?;
        let raws = extractor.images()?;
        Ok(self.persist_all(raws))
    }

    /// Persist a batch of raw images into a fresh map.
    pub fn persist_all(&mut self, raws: Vec<RawImage>) -> ImageMap {
        let mut map = ImageMap::default();
        for raw in raws {
            if map.entries.contains_key(&raw.origin_ref) {
                warn!("Duplicate image ref '{}' ignored", raw.origin_ref);
                continue;
            }
            match self.persist(raw) {
                Ok(img) => {
                    map.entries.insert(img.origin_ref.clone(), img);
                }
                Err(e) => {
                    warn!("Skipping {}", e);
                    map.failed += 1;
                }
            }
        }
        info!(
            "Images: {} packaged, {} failed",
            map.entries.len(),
            map.failed
        );
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn encoded(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    fn raw(origin_ref: &str, page: u32, index: usize, data: RawImageData) -> RawImage {
        RawImage {
            origin_ref: origin_ref.into(),
            page_number: page,
            index,
            data,
        }
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_ref("page1/img0"), "page1_img0");
        assert_eq!(sanitize_ref("#/pictures/3"), "pictures_3");
        assert_eq!(sanitize_ref("pics/a.png"), "pics_a.png");
        assert_eq!(sanitize_ref("///"), "image");
    }

    #[test]
    fn existing_image_extension_is_not_doubled() {
        let mut mgr = ImageAssetManager::new("unused");
        assert_eq!(mgr.unique_name("pics/figure.PNG", "png"), "pics_figure.png");
        assert_eq!(mgr.unique_name("scan.jpeg", "jpg"), "scan.jpg");
        assert_eq!(mgr.unique_name("v1.2", "png"), "v1.2.png");
    }

    #[test]
    fn unique_names_never_collide() {
        let mut mgr = ImageAssetManager::new("/unused");
        let a = mgr.unique_name("a/b", "png");
        let b = mgr.unique_name("a#b", "png");
        let c = mgr.unique_name("a_b", "png");
        assert_eq!(a, "a_b.png");
        assert_eq!(b, "a_b_1.png");
        assert_eq!(c, "a_b_2.png");
    }

    #[test]
    fn jpeg_stays_jpeg_and_png_stays_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = ImageAssetManager::new(dir.path());
        let jpeg = encoded(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 3, Rgb([200, 10, 10]))),
            ImageFormat::Jpeg,
        );
        let gif = encoded(
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 255, 255]))),
            ImageFormat::Gif,
        );
        let map = mgr.persist_all(vec![
            raw("page1/img0", 1, 0, RawImageData::Encoded(jpeg)),
            raw("page1/img1", 1, 1, RawImageData::Encoded(gif)),
        ]);

        let a = map.get("page1/img0").unwrap();
        assert_eq!(a.media_type, "image/jpeg");
        assert_eq!(a.file_name, "page1_img0.jpg");
        assert_eq!(a.packaged_path, "Images/page1_img0.jpg");
        assert_eq!(a.href, "../Images/page1_img0.jpg");
        assert_eq!(a.pixel_dimensions, (4, 3));
        assert!(a.disk_path.exists());

        let b = map.get("page1/img1").unwrap();
        assert_eq!(b.media_type, "image/png");
        assert_eq!(b.file_name, "page1_img1.png");
        let on_disk = std::fs::read(&b.disk_path).unwrap();
        assert_eq!(image::guess_format(&on_disk).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn decoded_jpeg_origin_is_reencoded_as_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = ImageAssetManager::new(dir.path());
        let img = mgr
            .persist(raw(
                "page3/img0",
                3,
                0,
                RawImageData::Decoded {
                    image: DynamicImage::ImageRgba8(RgbaImage::new(5, 5)),
                    source_format: Some(ImageFormat::Jpeg),
                },
            ))
            .unwrap();
        let bytes = std::fs::read(&img.disk_path).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn bad_image_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = ImageAssetManager::new(dir.path());
        let png = encoded(DynamicImage::new_rgb8(1, 1), ImageFormat::Png);
        let map = mgr.persist_all(vec![
            raw("page1/img0", 1, 0, RawImageData::Encoded(b"not an image".to_vec())),
            raw("page2/img0", 2, 0, RawImageData::Encoded(png)),
        ]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.failed(), 1);
        assert!(map.get("page1/img0").is_none());
        assert!(map.get("page2/img0").is_some());
    }

    #[test]
    fn same_index_on_different_pages_gets_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = ImageAssetManager::new(dir.path());
        let png = encoded(DynamicImage::new_rgb8(1, 1), ImageFormat::Png);
        let map = mgr.persist_all(vec![
            raw("page1/img0", 1, 0, RawImageData::Encoded(png.clone())),
            raw("page2/img0", 2, 0, RawImageData::Encoded(png)),
        ]);
        let names: HashSet<_> = map.iter().map(|i| i.file_name.clone()).collect();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn empty_input_is_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let map = ImageAssetManager::new(dir.path()).persist_all(Vec::new());
        assert!(map.is_empty());
        assert_eq!(map.failed(), 0);
    }
}
