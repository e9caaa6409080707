//! Per-page image enhancement before recognition.
//!
//! Scanned pages OCR noticeably better after a fixed transform chain:
//! grayscale conversion, then contrast normalization, then edge sharpening.
//! Sharpening has to come last; sharpening first amplifies scanner noise that
//! normalization would then stretch further.

use futures::StreamExt as _;
use image::{DynamicImage, GrayImage};
use tokio::task::spawn_blocking;

use crate::{prelude::*, rasterize::PageImage};

/// Gaussian blur radius of the unsharp mask.
const SHARPEN_SIGMA: f32 = 1.0;
/// Minimum brightness difference before the unsharp mask touches a pixel.
const SHARPEN_THRESHOLD: i32 = 2;

/// Enhance every page image, preserving page order.
///
/// Pages carry no cross-page state, so they are processed concurrently on the
/// blocking thread pool, up to one task per core. Any single page failure
/// fails the whole request; a partially-enhanced document would silently
/// degrade recognition of the remaining pages.
#[instrument(level = "debug", skip_all, fields(page_count = pages.len()))]
pub async fn enhance_pages(pages: Vec<PageImage>) -> Result<Vec<PageImage>> {
    futures::stream::iter(pages)
        .map(|page| async move {
            spawn_blocking(move || enhance_page(page))
                .await
                .context("enhancement task panicked")?
        })
        .buffered(num_cpus::get())
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect()
}

/// Enhance a single page, writing the result next to the raw image.
fn enhance_page(page: PageImage) -> Result<PageImage> {
    let img = image::open(&page.path)
        .with_context(|| format!("failed to open page image {:?}", page.path.display()))?;
    let gray = normalize_contrast(img.into_luma8());
    let enhanced = DynamicImage::ImageLuma8(gray).unsharpen(SHARPEN_SIGMA, SHARPEN_THRESHOLD);

    let out_path = page
        .path
        .with_file_name(format!("enhanced-{}.png", page.number));
    enhanced.save(&out_path).with_context(|| {
        format!("failed to write enhanced page {:?}", out_path.display())
    })?;
    Ok(PageImage {
        number: page.number,
        path: out_path,
    })
}

/// Stretch the observed luma range linearly to the full 0..=255 range.
fn normalize_contrast(gray: GrayImage) -> GrayImage {
    let (mut min, mut max) = (u8::MAX, u8::MIN);
    for pixel in gray.pixels() {
        min = min.min(pixel.0[0]);
        max = max.max(pixel.0[0]);
    }
    if min >= max {
        // Flat image, nothing to stretch.
        return gray;
    }
    let range = f32::from(max - min);
    let mut out = gray;
    for pixel in out.pixels_mut() {
        let stretched = f32::from(pixel.0[0] - min) * 255.0 / range;
        pixel.0[0] = stretched.round() as u8;
    }
    out
}
