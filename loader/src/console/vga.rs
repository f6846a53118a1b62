//! VGA text-mode console (legacy BIOS fallback when no framebuffer is
//! available).

/// The VGA text buffer.
const VGA_BASE: *mut u16 = 0xB8000 as *mut u16;
const COLUMNS: usize = 80;
const ROWS: usize = 25;
/// Light grey on black.
const ATTRIBUTE: u16 = 0x0700;

/// Cursor state for the 80x25 text buffer.
pub struct VgaText {
    column: usize,
    row: usize,
}

impl VgaText {
    /// Clears the screen and homes the cursor.
    pub fn new() -> Self {
        for at in 0..COLUMNS * ROWS {
            // SAFETY: the VGA text buffer is always mapped on BIOS
            // machines and 80*25 cells long.
            unsafe { VGA_BASE.add(at).write_volatile(ATTRIBUTE | u16::from(b' ')) };
        }
        Self { column: 0, row: 0 }
    }

    /// Writes one byte, handling newline and scrolling.
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => {
                self.column = 0;
                self.row += 1;
            }
            b'\r' => self.column = 0,
            _ => {
                let at = self.row * COLUMNS + self.column;
                // SAFETY: row/column are kept in range below.
                unsafe { VGA_BASE.add(at).write_volatile(ATTRIBUTE | u16::from(byte)) };
                self.column += 1;
                if self.column == COLUMNS {
                    self.column = 0;
                    self.row += 1;
                }
            }
        }
        if self.row == ROWS {
            self.scroll();
            self.row = ROWS - 1;
        }
    }

    fn scroll(&mut self) {
        for at in 0..COLUMNS * (ROWS - 1) {
            // SAFETY: both cells are inside the text buffer.
            unsafe {
                let below = VGA_BASE.add(at + COLUMNS).read_volatile();
                VGA_BASE.add(at).write_volatile(below);
            }
        }
        for column in 0..COLUMNS {
            // SAFETY: the last row is inside the text buffer.
            unsafe {
                VGA_BASE
                    .add((ROWS - 1) * COLUMNS + column)
                    .write_volatile(ATTRIBUTE | u16::from(b' '));
            }
        }
    }
}
