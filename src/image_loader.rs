use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::Size;
use exif::{In, Reader, Tag};
use image::DynamicImage;
use image::imageops::FilterType;
use tracing::{debug, warn};

use crate::frame::Frame;

// --- Helper: Load and Sort Image Paths ---
pub fn load_sorted_image_paths(dir_path: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let entries = fs::read_dir(dir_path)
        .with_context(|| format!("failed to read directory {}", dir_path.display()))?;

    for entry in entries {
        let path = entry.context("failed to read directory entry")?.path();
        if path.is_file() && is_image(&path) {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    if paths.is_empty() {
        bail!("no image files found in directory {}", dir_path.display());
    }
    Ok(paths)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| matches!(ext.to_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp" | "gif"))
        .unwrap_or(false)
}

// --- Load Image, Apply EXIF Rotation, Scale to the Panel ---
pub fn load_frame_with_exif_rotation(image_path: &Path, size: Size) -> Result<Frame> {
    let file_bytes = fs::read(image_path)
        .with_context(|| format!("failed to read {}", image_path.display()))?;

    let image = image::load_from_memory(&file_bytes)
        .with_context(|| format!("failed to decode {}", image_path.display()))?;
    let image = apply_orientation(image, exif_orientation(image_path, &file_bytes));

    Ok(frame_from_image(&image, size))
}

/// EXIF orientation tag, 1 (upright) when absent or unreadable.
fn exif_orientation(image_path: &Path, file_bytes: &[u8]) -> u32 {
    let extension = image_path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();
    // Only JPEG carries EXIF reliably.
    if extension != "jpg" && extension != "jpeg" {
        return 1;
    }
    match Reader::new().read_from_container(&mut Cursor::new(file_bytes)) {
        Ok(exif) => exif
            .get_field(Tag::Orientation, In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(e) => {
            warn!(path = %image_path.display(), error = %e, "could not read EXIF data");
            1
        }
    }
}

// 1 = upright, 3 = 180 deg, 6 = 90 deg CW, 8 = 90 deg CCW. Mirrored variants are ignored.
fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        3 => image.rotate180(),
        6 => image.rotate90(),
        8 => image.rotate270(),
        1 => image,
        other => {
            debug!(orientation = other, "ignoring mirrored EXIF orientation");
            image
        }
    }
}

/// Scale (cropping to fill) and convert an image to a panel-sized frame.
pub fn frame_from_image(image: &DynamicImage, size: Size) -> Frame {
    let rgb = if image.width() == size.width && image.height() == size.height {
        image.to_rgb8()
    } else {
        image
            .resize_to_fill(size.width, size.height, FilterType::Triangle)
            .to_rgb8()
    };
    let mut frame = Frame::new(size.width, size.height);
    for (x, y, px) in rgb.enumerate_pixels() {
        frame.set_pixel(x, y, Rgb888::new(px[0], px[1], px[2]));
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_sorted_paths_skip_non_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["b.png", "a.PNG", "notes.txt", "c.jpg"] {
            fs::write(dir.path().join(name), b"x").expect("write");
        }
        let names: Vec<_> = load_sorted_image_paths(dir.path())
            .expect("images present")
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PNG", "b.png", "c.jpg"]);
    }

    #[test]
    fn test_empty_dir_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_sorted_image_paths(dir.path()).is_err());
    }

    #[test]
    fn test_png_is_scaled_to_panel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("red.png");
        RgbImage::from_pixel(320, 160, Rgb([255, 0, 0]))
            .save(&path)
            .expect("save png");

        let frame = load_frame_with_exif_rotation(&path, Size::new(160, 80)).expect("loads");
        assert_eq!((frame.width(), frame.height()), (160, 80));
        assert_eq!(frame.pixel(80, 40), Some(Rgb888::new(255, 0, 0)));
    }

    #[test]
    fn test_corrupt_image_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.png");
        fs::write(&path, b"not a png").expect("write");
        assert!(load_frame_with_exif_rotation(&path, Size::new(160, 80)).is_err());
    }
}
