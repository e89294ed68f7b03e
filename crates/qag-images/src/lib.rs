//! Cover-image normalization and icon-pack archiving.
//!
//! Every icon ends up as a JPEG bounded to a fixed box, named after the
//! app's package-id slug, and the whole cache directory is zipped with
//! flattened entry paths for release upload.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;
use tracing::debug;
use zip::write::SimpleFileOptions;

pub const CRATE_NAME: &str = "qag-images";

/// Icons are bounded to this box; matches the launcher's banner slot.
pub const MAX_BOX: (u32, u32) = (720, 405);

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("processing image: {0}")]
    Image(#[from] image::ImageError),
    #[error("writing {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    pub max_box: (u32, u32),
    pub quality: u8,
    /// Center-crop to the box's exact aspect ratio instead of preserving the
    /// source aspect. Off in the current policy.
    pub change_aspect_ratio: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_box: MAX_BOX,
            quality: 90,
            change_aspect_ratio: false,
        }
    }
}

/// Normalizes an image file into `dest` as a bounded JPEG.
pub fn normalize_file(source: &Path, dest: &Path, options: &NormalizeOptions) -> Result<(), ImageError> {
    let img = image::open(source)?;
    write_normalized(img, dest, options)
}

/// Normalizes an in-memory image (as fetched from the network) into `dest`.
pub fn normalize_bytes(data: &[u8], dest: &Path, options: &NormalizeOptions) -> Result<(), ImageError> {
    let img = image::load_from_memory(data)?;
    write_normalized(img, dest, options)
}

fn write_normalized(img: DynamicImage, dest: &Path, options: &NormalizeOptions) -> Result<(), ImageError> {
    let (max_w, max_h) = options.max_box;

    let img = if options.change_aspect_ratio {
        crop_to_aspect(img, max_w, max_h).resize_exact(max_w, max_h, FilterType::Lanczos3)
    } else if img.width() > max_w || img.height() > max_h {
        // `resize` preserves aspect ratio within the box; small images are
        // left alone rather than upscaled.
        img.resize(max_w, max_h, FilterType::Lanczos3)
    } else {
        img
    };

    debug!(dest = %dest.display(), width = img.width(), height = img.height(), "writing icon");
    let rgb = img.to_rgb8();
    let file = File::create(dest).map_err(|source| ImageError::Write {
        path: dest.display().to_string(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, options.quality);
    rgb.write_with_encoder(encoder)?;
    writer.flush().map_err(|source| ImageError::Write {
        path: dest.display().to_string(),
        source,
    })?;
    Ok(())
}

/// Largest centered region of `img` with the `target_w:target_h` aspect.
fn crop_to_aspect(img: DynamicImage, target_w: u32, target_h: u32) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    // Compare w/h against target_w/target_h without going through floats.
    let wide = u64::from(w) * u64::from(target_h) > u64::from(target_w) * u64::from(h);
    let (crop_w, crop_h) = if wide {
        (h * target_w / target_h, h)
    } else {
        (w, w * target_h / target_w)
    };
    let x = (w - crop_w) / 2;
    let y = (h - crop_h) / 2;
    img.crop_imm(x, y, crop_w, crop_h)
}

/// Zips every regular file in `dir` into `zip_path` with entry names
/// relative to the cache root (flattened, no nesting). Returns the entry
/// count.
pub fn pack_icons(dir: &Path, zip_path: &Path) -> Result<usize> {
    let file = File::create(zip_path)
        .with_context(|| format!("creating {}", zip_path.display()))?;
    let mut writer = zip::ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("listing {}", dir.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut count = 0usize;
    for entry in entries {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        writer
            .start_file(&name, options)
            .with_context(|| format!("starting zip entry {name}"))?;
        let mut source = File::open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        std::io::copy(&mut source, &mut writer)
            .with_context(|| format!("writing zip entry {name}"))?;
        count += 1;
    }

    writer.finish().context("finishing icon pack")?;
    Ok(count)
}

/// Extracts an icon pack (or any zip asset) into `dest`.
pub fn unpack_archive(zip_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(zip_path)
        .with_context(|| format!("opening {}", zip_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("reading archive {}", zip_path.display()))?;
    archive
        .extract(dest)
        .with_context(|| format!("extracting {} into {}", zip_path.display(), dest.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 40, 40]));
        img.save(path).unwrap();
    }

    #[test]
    fn oversized_images_are_bounded_to_the_box() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("big.png");
        let dest = dir.path().join("big.jpg");
        write_png(&source, 1440, 1440);

        normalize_file(&source, &dest, &NormalizeOptions::default()).unwrap();

        let bytes = std::fs::read(&dest).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);
        let out = image::load_from_memory(&bytes).unwrap();
        assert!(out.width() <= 720 && out.height() <= 405);
        // Source is square, so height is the binding dimension.
        assert_eq!(out.height(), 405);
        assert_eq!(out.width(), 405);
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("small.png");
        let dest = dir.path().join("small.jpg");
        write_png(&source, 320, 180);

        normalize_file(&source, &dest, &NormalizeOptions::default()).unwrap();
        let out = image::open(&dest).unwrap();
        assert_eq!((out.width(), out.height()), (320, 180));
    }

    #[test]
    fn aspect_mode_yields_the_exact_box() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("square.png");
        let dest = dir.path().join("square.jpg");
        write_png(&source, 1000, 1000);

        let options = NormalizeOptions {
            change_aspect_ratio: true,
            ..NormalizeOptions::default()
        };
        normalize_file(&source, &dest, &options).unwrap();
        let out = image::open(&dest).unwrap();
        assert_eq!((out.width(), out.height()), (720, 405));
    }

    #[test]
    fn undecodable_input_is_an_error_not_a_panic() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.jpg");
        let result = normalize_bytes(b"definitely not an image", &dest, &NormalizeOptions::default());
        assert!(matches!(result, Err(ImageError::Image(_))));
        assert!(!dest.exists());
    }

    #[test]
    fn icon_pack_entries_are_flattened_file_names() {
        let dir = tempdir().unwrap();
        let icons = dir.path().join("icons");
        std::fs::create_dir(&icons).unwrap();
        write_png(&icons.join("app-one.png"), 8, 8);
        write_png(&icons.join("app-two.png"), 8, 8);
        std::fs::create_dir(icons.join("nested")).unwrap();

        let pack = dir.path().join("iconpack.zip");
        let count = pack_icons(&icons, &pack).unwrap();
        assert_eq!(count, 2);

        let mut archive = zip::ZipArchive::new(File::open(&pack).unwrap()).unwrap();
        let names: Vec<_> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, ["app-one.png", "app-two.png"]);
    }

    #[test]
    fn packed_archive_round_trips_through_unpack() {
        let dir = tempdir().unwrap();
        let icons = dir.path().join("icons");
        std::fs::create_dir(&icons).unwrap();
        write_png(&icons.join("only.png"), 8, 8);

        let pack = dir.path().join("iconpack.zip");
        pack_icons(&icons, &pack).unwrap();

        let out = dir.path().join("restored");
        unpack_archive(&pack, &out).unwrap();
        assert!(out.join("only.png").is_file());
    }
}
