//! Framebuffer glyph console.
//!
//! Renders the built-in 8x16 font directly into the linear framebuffer,
//! leaving the bottom two text rows alone so the progress bar and the
//! splash margin survive logging.

use simpleboot_multiboot2::FramebufferInfo;

use super::font;

/// Glyph renderer state over a linear framebuffer.
pub struct FbText {
    fb: FramebufferInfo,
    column: u32,
    row: u32,
    columns: u32,
    rows: u32,
    foreground: u32,
    background: u32,
}

impl FbText {
    /// Creates a renderer; text starts at the top-left with a small
    /// margin.
    #[must_use]
    pub fn new(fb: FramebufferInfo, background_rgb: u32) -> Self {
        let columns = (fb.width / font::GLYPH_WIDTH as u32).max(1);
        // Keep the bottom two scanline rows for the progress bar.
        let rows = (fb.height.saturating_sub(2) / font::GLYPH_HEIGHT as u32).max(1);
        let foreground = fb.pack_color(0x00C0_C0C0);
        let background = fb.pack_color(background_rgb);
        Self {
            fb,
            column: 0,
            row: 0,
            columns,
            rows,
            foreground,
            background,
        }
    }

    /// The framebuffer this renderer draws to.
    #[must_use]
    pub fn info(&self) -> &FramebufferInfo {
        &self.fb
    }

    /// Writes one byte, handling newline and wrap.
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => {
                self.column = 0;
                self.row += 1;
            }
            b'\r' => self.column = 0,
            _ => {
                self.draw_glyph(byte);
                self.column += 1;
                if self.column == self.columns {
                    self.column = 0;
                    self.row += 1;
                }
            }
        }
        if self.row == self.rows {
            // Wrapping back to the top keeps the renderer allocation-free;
            // boot output rarely fills a screen outside verbose 3.
            self.row = 0;
        }
    }

    fn draw_glyph(&mut self, byte: u8) {
        let glyph = font::glyph(byte);
        let x0 = self.column * font::GLYPH_WIDTH as u32;
        let y0 = self.row * font::GLYPH_HEIGHT as u32;
        for (dy, &bits) in glyph.iter().enumerate() {
            for dx in 0..font::GLYPH_WIDTH as u32 {
                let lit = bits & (0x80 >> dx) != 0;
                let color = if lit { self.foreground } else { self.background };
                put_pixel(&self.fb, x0 + dx, y0 + dy as u32, color);
            }
        }
    }
}

/// Writes one packed pixel, honouring pitch and pixel size.
pub fn put_pixel(fb: &FramebufferInfo, x: u32, y: u32, packed: u32) {
    if x >= fb.width || y >= fb.height {
        return;
    }
    let bytes_per_pixel = u32::from(fb.bpp.div_ceil(8));
    let at = (fb.address + u64::from(y * fb.pitch + x * bytes_per_pixel)) as usize;
    // SAFETY: the framebuffer range was reported by the firmware and the
    // coordinates were bounds-checked above.
    unsafe {
        match bytes_per_pixel {
            2 => (at as *mut u16).write_volatile(packed as u16),
            3 => {
                let p = at as *mut u8;
                p.write_volatile(packed as u8);
                p.add(1).write_volatile((packed >> 8) as u8);
                p.add(2).write_volatile((packed >> 16) as u8);
            }
            _ => (at as *mut u32).write_volatile(packed),
        }
    }
}
