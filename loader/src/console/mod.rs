//! The multi-sink boot console.
//!
//! Every byte written goes to all configured outputs at once: the serial
//! port, the framebuffer glyph renderer, VGA text (legacy BIOS), the
//! firmware's ConOut (until `ExitBootServices`), and the Bochs/QEMU
//! debug port when one is present. Sinks are registered as the firmware
//! layer discovers them.

pub mod fbtext;
pub mod font;

#[cfg(target_arch = "x86_64")]
pub mod serial;
#[cfg(target_arch = "x86_64")]
pub mod vga;

use core::fmt;

use crate::cell::BootCell;
use fbtext::FbText;

/// The global console state.
static CONSOLE: BootCell<Console> = BootCell::new(Console::new());

struct Console {
    serial: bool,
    debug_port: bool,
    fb: Option<FbText>,
    #[cfg(target_arch = "x86_64")]
    vga: Option<vga::VgaText>,
    #[cfg(target_arch = "x86_64")]
    conout: Option<*mut uefi::protocol::simple_text::SimpleTextOutputProtocol>,
    #[cfg(target_arch = "aarch64")]
    pl011_base: Option<u64>,
}

impl Console {
    const fn new() -> Self {
        Self {
            serial: false,
            debug_port: false,
            fb: None,
            #[cfg(target_arch = "x86_64")]
            vga: None,
            #[cfg(target_arch = "x86_64")]
            conout: None,
            #[cfg(target_arch = "aarch64")]
            pl011_base: None,
        }
    }

    fn write_byte(&mut self, byte: u8) {
        #[cfg(target_arch = "x86_64")]
        {
            if self.serial {
                serial::write_byte(byte);
            }
            if self.debug_port {
                // SAFETY: the port answered the 0xE9 probe.
                unsafe { crate::arch::x86_64::outb(0xE9, byte) };
            }
            if let Some(vga) = &mut self.vga {
                vga.write_byte(byte);
            }
            if let Some(conout) = self.conout {
                // ConOut wants CRLF and UCS-2.
                // SAFETY: registered only while boot services are active
                // and cleared before ExitBootServices.
                unsafe {
                    if byte == b'\n' {
                        (*conout).put_char(u16::from(b'\r'));
                    }
                    (*conout).put_char(u16::from(byte));
                }
            }
        }
        #[cfg(target_arch = "aarch64")]
        {
            if self.serial
                && let Some(base) = self.pl011_base
            {
                crate::fw::rpi::uart_put(base, byte);
            }
            let _ = self.debug_port;
        }
        if let Some(fb) = &mut self.fb {
            fb.write_byte(byte);
        }
    }
}

/// Writes one byte to every configured sink.
pub fn write_byte(byte: u8) {
    CONSOLE.with(|console| console.write_byte(byte));
}

/// Writes a string to every configured sink.
pub fn write_str(text: &str) {
    CONSOLE.with(|console| {
        for &byte in text.as_bytes() {
            console.write_byte(byte);
        }
    });
}

/// A `core::fmt` adapter over the console.
pub struct ConsoleWriter;

impl fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_str(s);
        Ok(())
    }
}

/// Marks the serial sink as initialised.
pub fn enable_serial() {
    CONSOLE.with(|console| console.serial = true);
}

/// Marks the debug-port sink as present (the port read back `0xE9`).
pub fn enable_debug_port() {
    CONSOLE.with(|console| console.debug_port = true);
}

/// Installs (or replaces) the framebuffer glyph sink.
pub fn set_framebuffer(fb: FbText) {
    CONSOLE.with(|console| console.fb = Some(fb));
}

/// Removes the framebuffer sink (mode switch in progress).
pub fn clear_framebuffer() {
    CONSOLE.with(|console| console.fb = None);
}

/// Installs the VGA text sink (legacy BIOS without a framebuffer).
#[cfg(target_arch = "x86_64")]
pub fn set_vga(vga: vga::VgaText) {
    CONSOLE.with(|console| console.vga = Some(vga));
}

/// Installs the UEFI ConOut sink.
#[cfg(target_arch = "x86_64")]
pub fn set_conout(conout: *mut uefi::protocol::simple_text::SimpleTextOutputProtocol) {
    CONSOLE.with(|console| console.conout = Some(conout));
}

/// Drops the ConOut sink; must happen before `ExitBootServices`.
#[cfg(target_arch = "x86_64")]
pub fn clear_conout() {
    CONSOLE.with(|console| console.conout = None);
}

/// Installs the PL011 sink (Raspberry Pi).
#[cfg(target_arch = "aarch64")]
pub fn set_pl011(base: u64) {
    CONSOLE.with(|console| {
        console.pl011_base = Some(base);
        console.serial = true;
    });
}
