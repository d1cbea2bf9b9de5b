//! In-process converter built on the `image` crate.
//!
//! Useful where ImageMagick is not installed.  Decoding and encoding run on
//! the blocking pool.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use image::imageops::FilterType;
use image::GenericImageView;

use super::{Bounds, ImageConverter};

#[derive(Debug, Default)]
pub struct NativeConverter;

impl NativeConverter {
    pub fn new() -> Self {
        Self
    }
}

fn convert_blocking(source: &Path, output: &Path, bounds: Bounds) -> anyhow::Result<()> {
    let img = image::ImageReader::open(source)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", source.display()))?
        .decode()
        .map_err(|e| anyhow::anyhow!("failed to decode {}: {e}", source.display()))?;
    let (width, height) = img.dimensions();
    let (target_w, target_h) = bounds.fit(width, height);

    let thumb = if (target_w, target_h) == (width, height) {
        img
    } else {
        img.resize_exact(target_w, target_h, FilterType::Triangle)
    };

    thumb
        .save(output)
        .map_err(|e| anyhow::anyhow!("failed to encode {}: {e}", output.display()))?;
    Ok(())
}

impl ImageConverter for NativeConverter {
    fn thumbnail<'a>(
        &'a self,
        source: &'a Path,
        output: &'a Path,
        bounds: Bounds,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        let source = source.to_path_buf();
        let output = output.to_path_buf();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || convert_blocking(&source, &output, bounds))
                .await
                .map_err(|e| anyhow::anyhow!("conversion task panicked: {e}"))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, width: u32, height: u32) {
        image::RgbImage::new(width, height).save(path).unwrap();
    }

    #[tokio::test]
    async fn test_shrinks_to_bounds_preserving_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("cat.png");
        let dst = dir.path().join("thumb_cat.png");
        write_png(&src, 800, 600);

        NativeConverter::new()
            .thumbnail(&src, &dst, Bounds::new(200, 200))
            .await
            .unwrap();

        assert_eq!(image::image_dimensions(&dst).unwrap(), (200, 150));
    }

    #[tokio::test]
    async fn test_small_image_not_upscaled() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("icon.png");
        let dst = dir.path().join("thumb_icon.png");
        write_png(&src, 64, 48);

        NativeConverter::new()
            .thumbnail(&src, &dst, Bounds::new(200, 200))
            .await
            .unwrap();

        assert_eq!(image::image_dimensions(&dst).unwrap(), (64, 48));
    }

    #[tokio::test]
    async fn test_output_format_follows_extension() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("photo.png");
        let dst = dir.path().join("thumb_photo.jpg");
        write_png(&src, 400, 400);

        NativeConverter::new()
            .thumbnail(&src, &dst, Bounds::new(200, 200))
            .await
            .unwrap();

        let bytes = std::fs::read(&dst).unwrap();
        assert_eq!(
            image::guess_format(&bytes).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[tokio::test]
    async fn test_format_detected_from_content() {
        let dir = tempfile::tempdir().unwrap();
        let jpeg = dir.path().join("photo.jpg");
        image::RgbImage::new(400, 300).save(&jpeg).unwrap();
        let misnamed = dir.path().join("photo.png");
        let bare = dir.path().join("photo");
        std::fs::copy(&jpeg, &misnamed).unwrap();
        std::fs::copy(&jpeg, &bare).unwrap();

        for src in [&misnamed, &bare] {
            let dst = dir.path().join("thumb_photo.png");
            NativeConverter::new()
                .thumbnail(src, &dst, Bounds::new(200, 200))
                .await
                .unwrap();
            assert_eq!(image::image_dimensions(&dst).unwrap(), (200, 150));
        }
    }

    #[tokio::test]
    async fn test_undecodable_input_errors() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("broken.png");
        std::fs::write(&src, b"not an image").unwrap();

        let result = NativeConverter::new()
            .thumbnail(&src, &dir.path().join("thumb_broken.png"), Bounds::new(200, 200))
            .await;
        assert!(result.is_err());
    }
}
