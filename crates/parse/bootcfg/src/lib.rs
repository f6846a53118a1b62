//! `simpleboot-bootcfg` --- the boot configuration grammar, `no_std`.
//!
//! The configuration is a line-oriented key/argument format read from
//! `simpleboot.cfg` (or `easyboot/menu.cfg` as a fallback):
//!
//! ```text
//! verbose 1
//! framebuffer 1024 768 32
//! bootsplash #102030 logo.tga
//! kernel vmlinuz console=ttyS0
//! module initrd.gz
//! multicore
//! backup kernel vmlinuz-fallback
//! ```
//!
//! Two deliberate passes mirror the boot sequence: [`BootConfig::parse`]
//! runs before anything is loaded and discovers the kernel (and therefore
//! an allocation upper bound); [`modules`] runs again after the kernel is
//! in memory and yields the module lines in order.
//!
//! Lines prefixed with `backup` (with or without a separating space) are
//! active only in backup mode, and all other lines only in primary mode.
//! A second `menuentry` terminates parsing. `\ ` in a path stands for a
//! literal space. Unknown directives are reported to the caller but are
//! not errors.

#![no_std]
#![warn(missing_docs)]

/// Framebuffer argument limits; out-of-range requests fall back to the
/// firmware-provided mode.
const FB_WIDTH_RANGE: (u32, u32) = (320, 65536);
const FB_HEIGHT_RANGE: (u32, u32) = (200, 65536);
const FB_BPP_RANGE: (u32, u32) = (15, 32);

/// Parsed configuration, borrowing path and command-line slices from the
/// config text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootConfig<'a> {
    /// Kernel path as written (escapes intact); `None` if no `kernel` line.
    pub kernel: Option<&'a str>,
    /// Everything after the kernel path on the `kernel` line.
    pub cmdline: Option<&'a str>,
    /// Verbosity 0..3 from the `verbose` directive.
    pub verbose: u8,
    /// Validated `framebuffer <w> <h> <bpp>` request.
    pub framebuffer: Option<(u32, u32, u32)>,
    /// `bootsplash` background color as `0x00RRGGBB`.
    pub splash_color: Option<u32>,
    /// `bootsplash` TGA path as written (escapes intact).
    pub splash_path: Option<&'a str>,
    /// `true` if a `multicore` directive was seen.
    pub multicore: bool,
}

impl<'a> BootConfig<'a> {
    /// Parses everything except module lines.
    #[must_use]
    pub fn parse(text: &'a str, backup: bool) -> Self {
        Self::parse_with(text, backup, |_| {})
    }

    /// Parses everything except module lines, reporting each unknown
    /// directive to `on_unknown`.
    pub fn parse_with(
        text: &'a str,
        backup: bool,
        mut on_unknown: impl FnMut(&'a str),
    ) -> Self {
        let mut config = Self::default();
        let mut menu_entries = 0;

        for (directive, arg) in directives(text, backup) {
            match directive {
                "multicore" => config.multicore = true,
                "menuentry" => {
                    if !arg.is_empty() {
                        menu_entries += 1;
                        if menu_entries > 1 {
                            break;
                        }
                    }
                }
                "verbose" => {
                    if let Some(v) = parse_u32(arg) {
                        config.verbose = v.min(3) as u8;
                    }
                }
                "framebuffer" => {
                    config.framebuffer = parse_framebuffer(arg);
                }
                "bootsplash" => {
                    let mut rest = arg;
                    if let Some(hex) = rest.strip_prefix('#') {
                        let (color, after) = split_word(hex);
                        if let Some(rgb) = parse_rgb(color) {
                            config.splash_color = Some(rgb);
                        }
                        rest = after;
                    }
                    if !rest.is_empty() {
                        config.splash_path = Some(rest);
                    }
                }
                "kernel" => {
                    if !arg.is_empty() {
                        let (path, cmdline) = split_path(arg);
                        config.kernel = Some(path);
                        config.cmdline = cmdline;
                    }
                }
                "module" => {} // handled by the second pass
                _ => on_unknown(directive),
            }
        }
        config
    }
}

/// Returns an iterator over the `module` line arguments, in file order.
///
/// Each item is the full argument text: the (escaped) path, optionally
/// followed by the module's own parameters. The whole string becomes the
/// module tag's command line.
pub fn modules(text: &str, backup: bool) -> impl Iterator<Item = &str> {
    directives(text, backup)
        .filter(|(directive, arg)| *directive == "module" && !arg.is_empty())
        .map(|(_, arg)| arg)
}

/// Splits a path-plus-arguments string at the first unescaped space.
///
/// Returns the path (escapes intact) and, if present, the remainder with
/// leading spaces stripped.
#[must_use]
pub fn split_path(arg: &str) -> (&str, Option<&str>) {
    let bytes = arg.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if i + 1 < bytes.len() && bytes[i + 1] == b' ' => i += 2,
            b' ' => break,
            _ => i += 1,
        }
    }
    let path = &arg[..i];
    let rest = arg[i..].trim_start_matches(' ');
    if rest.is_empty() {
        (path, None)
    } else {
        (path, Some(rest))
    }
}

/// Copies `raw` into `buf` resolving `\ ` escapes to plain spaces.
///
/// Returns `None` if the unescaped path does not fit in `buf`.
#[must_use]
pub fn unescape_path<'b>(raw: &str, buf: &'b mut [u8]) -> Option<&'b str> {
    let mut out = 0;
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = if bytes[i] == b'\\' && i + 1 < bytes.len() && bytes[i + 1] == b' ' {
            i += 2;
            b' '
        } else {
            let b = bytes[i];
            i += 1;
            b
        };
        if out >= buf.len() {
            return None;
        }
        buf[out] = b;
        out += 1;
    }
    // The input was valid UTF-8 and escape resolution only replaces an
    // ASCII pair with an ASCII byte.
    core::str::from_utf8(&buf[..out]).ok()
}

/// Iterator over `(directive, argument)` pairs active in the given mode.
fn directives(text: &str, backup: bool) -> impl Iterator<Item = (&str, &str)> {
    text.lines().filter_map(move |line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        // `backup` may be glued to the directive or separated by spaces.
        let (is_backup, rest) = match line.strip_prefix("backup") {
            Some(rest) => (true, rest.trim_start()),
            None => (false, line),
        };
        if is_backup != backup {
            return None;
        }

        let (directive, arg) = split_word(rest);
        if directive.is_empty() {
            return None;
        }
        Some((directive, arg))
    })
}

/// Splits at the first space; the remainder has leading spaces stripped.
fn split_word(text: &str) -> (&str, &str) {
    match text.find(' ') {
        Some(at) => (&text[..at], text[at..].trim_start_matches(' ')),
        None => (text, ""),
    }
}

/// Parses a decimal number, ignoring anything after the digits.
fn parse_u32(text: &str) -> Option<u32> {
    let digits = text.as_bytes().iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    text[..digits].parse().ok()
}

/// Parses exactly six hex digits as `0x00RRGGBB`.
fn parse_rgb(text: &str) -> Option<u32> {
    if text.len() != 6 {
        return None;
    }
    u32::from_str_radix(text, 16).ok()
}

/// Parses and range-checks `<width> <height> <bpp>`.
fn parse_framebuffer(arg: &str) -> Option<(u32, u32, u32)> {
    let (w, rest) = split_word(arg);
    let (h, rest) = split_word(rest);
    let (bpp, _) = split_word(rest);
    let (w, h, bpp) = (parse_u32(w)?, parse_u32(h)?, parse_u32(bpp)?);
    let in_range = |v, (lo, hi)| v >= lo && v <= hi;
    if in_range(w, FB_WIDTH_RANGE) && in_range(h, FB_HEIGHT_RANGE) && in_range(bpp, FB_BPP_RANGE)
    {
        Some((w, h, bpp))
    } else {
        None
    }
}

#[cfg(test)]
extern crate alloc;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    const SAMPLE: &str = "\
# boot menu
verbose 2
framebuffer 1024 768 32
bootsplash #102030 splash.tga
menuentry linux
kernel boot/vmlinuz\\ x64 console=ttyS0,115200 root=/dev/sda1
module initrd.gz
module cpio\\ archive.cpio extra=1
multicore
backup kernel vmlinuz-old
backup module initrd-old.gz
";

    #[test]
    fn primary_pass() {
        let config = BootConfig::parse(SAMPLE, false);
        assert_eq!(config.verbose, 2);
        assert_eq!(config.framebuffer, Some((1024, 768, 32)));
        assert_eq!(config.splash_color, Some(0x0010_2030));
        assert_eq!(config.splash_path, Some("splash.tga"));
        assert_eq!(config.kernel, Some("boot/vmlinuz\\ x64"));
        assert_eq!(config.cmdline, Some("console=ttyS0,115200 root=/dev/sda1"));
        assert!(config.multicore);
    }

    #[test]
    fn backup_pass() {
        let config = BootConfig::parse(SAMPLE, true);
        assert_eq!(config.kernel, Some("vmlinuz-old"));
        assert_eq!(config.cmdline, None);
        // Primary-only directives are inactive in backup mode.
        assert_eq!(config.framebuffer, None);
        assert!(!config.multicore);
    }

    #[test]
    fn module_pass_keeps_order_and_mode() {
        let primary: Vec<&str> = modules(SAMPLE, false).collect();
        assert_eq!(primary, &["initrd.gz", "cpio\\ archive.cpio extra=1"]);
        let backup: Vec<&str> = modules(SAMPLE, true).collect();
        assert_eq!(backup, &["initrd-old.gz"]);
    }

    #[test]
    fn glued_backup_prefix() {
        let config = BootConfig::parse("backupkernel bzImage quiet\n", true);
        assert_eq!(config.kernel, Some("bzImage"));
        assert_eq!(config.cmdline, Some("quiet"));
    }

    #[test]
    fn second_menuentry_stops_parsing() {
        let text = "menuentry one\nkernel first\nmenuentry two\nkernel second\n";
        let config = BootConfig::parse(text, false);
        assert_eq!(config.kernel, Some("first"));
    }

    #[test]
    fn framebuffer_out_of_range_is_dropped() {
        let config = BootConfig::parse("framebuffer 100 100 32\n", false);
        assert_eq!(config.framebuffer, None);
        let config = BootConfig::parse("framebuffer 640 480 64\n", false);
        assert_eq!(config.framebuffer, None);
        let config = BootConfig::parse("framebuffer 640 480 16\n", false);
        assert_eq!(config.framebuffer, Some((640, 480, 16)));
    }

    #[test]
    fn bootsplash_color_only() {
        let config = BootConfig::parse("bootsplash #FF8000\n", false);
        assert_eq!(config.splash_color, Some(0x00FF_8000));
        assert_eq!(config.splash_path, None);
    }

    #[test]
    fn bootsplash_path_only() {
        let config = BootConfig::parse("bootsplash logo.tga\n", false);
        assert_eq!(config.splash_color, None);
        assert_eq!(config.splash_path, Some("logo.tga"));
    }

    #[test]
    fn verbose_clamped() {
        assert_eq!(BootConfig::parse("verbose 9\n", false).verbose, 3);
        assert_eq!(BootConfig::parse("verbose 0\n", false).verbose, 0);
    }

    #[test]
    fn unknown_directives_are_reported() {
        let mut unknown = Vec::new();
        let _ = BootConfig::parse_with("grubmode on\nkernel k\n", false, |d| unknown.push(d));
        assert_eq!(unknown, &["grubmode"]);
    }

    #[test]
    fn comments_and_blank_lines_are_silent() {
        let mut unknown = Vec::new();
        let _ = BootConfig::parse_with("# comment\n\n   \nkernel k\n", false, |d| {
            unknown.push(d);
        });
        assert!(unknown.is_empty());
    }

    #[test]
    fn split_path_honours_escapes() {
        assert_eq!(split_path("plain"), ("plain", None));
        assert_eq!(split_path("a\\ b c d"), ("a\\ b", Some("c d")));
        assert_eq!(split_path("a  spaced   args"), ("a", Some("spaced   args")));
    }

    #[test]
    fn unescape_path_resolves_spaces() {
        let mut buf = [0u8; 64];
        assert_eq!(unescape_path("boot/my\\ kernel", &mut buf), Some("boot/my kernel"));
        let mut tiny = [0u8; 4];
        assert_eq!(unescape_path("too long", &mut tiny), None);
    }

    #[test]
    fn crlf_line_endings() {
        let config = BootConfig::parse("verbose 1\r\nkernel k arg\r\n", false);
        assert_eq!(config.verbose, 1);
        assert_eq!(config.kernel, Some("k"));
        assert_eq!(config.cmdline, Some("arg"));
    }
}
