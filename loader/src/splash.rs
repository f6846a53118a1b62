//! Boot splash and progress bar rendering.

use simpleboot_multiboot2::FramebufferInfo;
use simpleboot_tga::TgaImage;

use crate::console::fbtext::put_pixel;

/// Clears the screen to the configured background and blits the splash
/// image, centered. Anything wrong with the image just leaves the
/// background; the splash is strictly best effort.
pub fn render(fb: &FramebufferInfo, background_rgb: u32, image: Option<&[u8]>) {
    let background = fb.pack_color(background_rgb);
    for y in 0..fb.height {
        for x in 0..fb.width {
            put_pixel(fb, x, y, background);
        }
    }

    let Some(data) = image else { return };
    let Ok(tga) = TgaImage::parse(data) else {
        log::warn!("bootsplash is not an indexed RLE TGA");
        return;
    };

    let offset_x = (fb.width.saturating_sub(tga.width())) / 2;
    let offset_y = (fb.height.saturating_sub(tga.height())) / 2;
    tga.decode(|x, y, rgb| {
        put_pixel(fb, offset_x + x, offset_y + y, fb.pack_color(rgb));
    });
}

/// The two-scanline progress bar at the bottom of the framebuffer.
///
/// The update stride is derived from the total byte count so the bar
/// crosses the full width exactly once per file.
pub struct ProgressBar {
    fb: Option<FramebufferInfo>,
    total: usize,
    filled_pixels: u32,
    color: u32,
}

impl ProgressBar {
    /// Prepares a bar for a `total`-byte transfer.
    #[must_use]
    pub fn new(fb: Option<&FramebufferInfo>, total: usize) -> Self {
        Self {
            fb: fb.copied(),
            total: total.max(1),
            filled_pixels: 0,
            color: fb.map_or(0, |fb| fb.pack_color(0x00FF_FFFF)),
        }
    }

    /// Advances the bar to `done` bytes.
    pub fn update(&mut self, done: usize) {
        let Some(fb) = &self.fb else { return };
        let target = (done.min(self.total) as u64 * u64::from(fb.width)
            / self.total as u64) as u32;
        while self.filled_pixels < target {
            let x = self.filled_pixels;
            put_pixel(fb, x, fb.height - 2, self.color);
            put_pixel(fb, x, fb.height - 1, self.color);
            self.filled_pixels += 1;
        }
    }

    /// Clears the bar area once the transfer is over.
    pub fn clear(&mut self) {
        let Some(fb) = &self.fb else { return };
        let background = 0;
        for x in 0..fb.width {
            put_pixel(fb, x, fb.height - 2, background);
            put_pixel(fb, x, fb.height - 1, background);
        }
        self.filled_pixels = 0;
    }
}
