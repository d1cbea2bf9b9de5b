//! Thumbnail converters.
//!
//! The [`ImageConverter`] trait turns a staged source file into a bounded
//! thumbnail file.  Both implementations shrink to fit inside the bounding
//! box, preserve aspect ratio, and never enlarge (ImageMagick's `WxH>`).

pub mod imagemagick;
pub mod native;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

/// Maximum thumbnail dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub max_width: u32,
    pub max_height: u32,
}

impl Bounds {
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width,
            max_height,
        }
    }

    /// ImageMagick geometry string with the shrink-only flag, e.g. `200x200>`.
    pub fn geometry(&self) -> String {
        format!("{}x{}>", self.max_width, self.max_height)
    }

    /// Dimensions an image of `width`×`height` is resized to.
    ///
    /// Images already inside the box are returned unchanged.  Otherwise the
    /// image is scaled by `min(max_w / w, max_h / h)`, rounding each side and
    /// keeping it at least one pixel.
    pub fn fit(&self, width: u32, height: u32) -> (u32, u32) {
        if width <= self.max_width && height <= self.max_height {
            return (width, height);
        }
        let scale = f64::min(
            self.max_width as f64 / width as f64,
            self.max_height as f64 / height as f64,
        );
        let w = ((width as f64 * scale).round() as u32).clamp(1, self.max_width.max(1));
        let h = ((height as f64 * scale).round() as u32).clamp(1, self.max_height.max(1));
        (w, h)
    }
}

/// Produces a thumbnail file from a source image file.
pub trait ImageConverter: Send + Sync + 'static {
    /// Write a thumbnail of `source` to `output`, bounded by `bounds`.
    /// The output format follows `output`'s extension.
    fn thumbnail<'a>(
        &'a self,
        source: &'a Path,
        output: &'a Path,
        bounds: Bounds,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}
