use image::{DynamicImage, RgbImage, imageops, imageops::FilterType};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Per-channel mean (R, G, B) subtracted from every pixel, on the [0, 255] scale.
pub const MEAN_RGB: [f32; 3] = [123.68, 116.78, 103.94];
pub const RESIZE_SHORT: u32 = 256;
pub const CROP_SIZE: u32 = 224;

/// Resize, crop, flip and normalize pipeline producing CHW images.
///
/// Training crops are taken at a random position and flipped half of the time;
/// evaluation crops are centered. The randomness of a read only depends on the
/// seed, the item index and how many times the item was read before.
#[derive(Clone, Debug)]
pub struct ImageTransform {
    pub resize_short: u32,
    pub crop_size: u32,
    pub random: Option<u64>,
}

impl ImageTransform {
    pub fn train(seed: u64) -> Self {
        Self {
            resize_short: RESIZE_SHORT,
            crop_size: CROP_SIZE,
            random: Some(seed),
        }
    }

    pub fn eval() -> Self {
        Self {
            resize_short: RESIZE_SHORT,
            crop_size: CROP_SIZE,
            random: None,
        }
    }

    /// # Shape
    /// Output: [3 * crop_size * crop_size], channels first.
    pub fn apply(&self, image: &DynamicImage, index: usize, draw: u64) -> Vec<f32> {
        debug_assert!(self.crop_size <= self.resize_short);
        let resized = resize_short(&image.to_rgb8(), self.resize_short);
        let (width, height) = resized.dimensions();
        let crop = self.crop_size;

        let (x, y, flip) = match self.random {
            Some(seed) => {
                let mut rng = item_rng(seed, index, draw);
                (
                    rng.random_range(0..=width - crop),
                    rng.random_range(0..=height - crop),
                    rng.random_bool(0.5),
                )
            }
            None => ((width - crop) / 2, (height - crop) / 2, false),
        };

        let cropped = imageops::crop_imm(&resized, x, y, crop, crop).to_image();
        let cropped = if flip {
            imageops::flip_horizontal(&cropped)
        } else {
            cropped
        };
        to_chw(&cropped)
    }
}

/// Rng dedicated to the `draw`-th read of one dataset item.
pub fn item_rng(seed: u64, index: usize, draw: u64) -> StdRng {
    StdRng::seed_from_u64(
        seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ draw.wrapping_mul(0xC2B2_AE3D_27D4_EB4F),
    )
}

/// Resizes so that the shorter side equals `target`, keeping the aspect ratio.
pub fn resize_short(image: &RgbImage, target: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let scale = |long: u32, short: u32| {
        ((long as u64 * target as u64) / short.max(1) as u64).max(target as u64) as u32
    };
    let (new_width, new_height) = if width <= height {
        (target, scale(height, width))
    } else {
        (scale(width, height), target)
    };
    imageops::resize(image, new_width, new_height, FilterType::Triangle)
}

/// Channels-first float values with the channel mean removed.
pub fn to_chw(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut out = vec![0.0; 3 * plane];
    for (x, y, pixel) in image.enumerate_pixels() {
        let i = (y * width + x) as usize;
        for (c, mean) in MEAN_RGB.iter().enumerate() {
            out[c * plane + i] = pixel[c] as f32 - mean;
        }
    }
    out
}
