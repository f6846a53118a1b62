//! Raspberry Pi bare-metal firmware variant.
//!
//! The GPU firmware loads the image at `0x80000` and starts all cores
//! there; core 0 carries on as the BSP, the rest are parked by the entry
//! stub. Capabilities are built on two hardware interfaces: the VideoCore
//! mailbox property channel (framebuffer, memory split, board revision,
//! clocks) and the EMMC host controller (SD single-block reads after the
//! CMD0/8/41/2/3/7 bring-up). The PL011 UART doubles as console and
//! "any key" source.

use simpleboot_fat::SECTOR_SIZE;
use simpleboot_multiboot2::{FramebufferInfo, MmapEntry, memory_kind};

use crate::arch::aarch64::delay_us;
use crate::error::BootError;
use crate::fw::{MemoryMap, SystemTables};

/// Peripheral base for BCM2836/BCM2837 (Pi 2/3).
const MMIO_BASE_PI3: u64 = 0x3F00_0000;
/// Peripheral base for BCM2711 (Pi 4).
const MMIO_BASE_PI4: u64 = 0xFE00_0000;

/// Mailbox registers relative to the peripheral base.
const MBOX_READ: u64 = 0xB880;
const MBOX_STATUS: u64 = 0xB898;
const MBOX_WRITE: u64 = 0xB8A0;
const MBOX_FULL: u32 = 0x8000_0000;
const MBOX_EMPTY: u32 = 0x4000_0000;
/// Property-tags channel.
const MBOX_CHANNEL_PROPERTY: u32 = 8;

/// EMMC registers relative to the peripheral base.
const EMMC_BASE: u64 = 0x30_0000;
const EMMC_ARG1: u64 = 0x08;
const EMMC_CMDTM: u64 = 0x0C;
const EMMC_RESP0: u64 = 0x10;
const EMMC_DATA: u64 = 0x20;
const EMMC_STATUS: u64 = 0x24;
const EMMC_INTERRUPT: u64 = 0x30;

/// PL011 registers relative to the peripheral base.
const UART_BASE: u64 = 0x20_1000;
const UART_DR: u64 = 0x00;
const UART_FR: u64 = 0x18;

/// 16-byte aligned mailbox message buffer.
#[repr(C, align(16))]
struct MboxBuffer([u32; 36]);

static MBOX: crate::cell::BootCell<MboxBuffer> = crate::cell::BootCell::new(MboxBuffer([0; 36]));

#[inline]
fn mmio_read(base: u64, offset: u64) -> u32 {
    // SAFETY: the peripheral window is device memory in the identity map.
    unsafe { ((base + offset) as *const u32).read_volatile() }
}

#[inline]
fn mmio_write(base: u64, offset: u64, value: u32) {
    // SAFETY: as above.
    unsafe { ((base + offset) as *mut u32).write_volatile(value) }
}

/// Writes one byte to the PL011, LF expanded to CRLF.
pub fn uart_put(mmio_base: u64, byte: u8) {
    if byte == b'\n' {
        uart_put(mmio_base, b'\r');
    }
    // Wait while the transmit FIFO is full.
    while mmio_read(mmio_base, UART_BASE + UART_FR) & (1 << 5) != 0 {
        core::hint::spin_loop();
    }
    mmio_write(mmio_base, UART_BASE + UART_DR, u32::from(byte));
}

/// The Raspberry Pi firmware context.
pub struct RpiFw {
    /// Peripheral MMIO base for this board generation.
    pub mmio_base: u64,
    /// EMMC controller base.
    pub emmc_base: u64,
    /// Board revision from the firmware.
    pub board_rev: u32,
    /// Device tree the GPU firmware handed over in `x0`.
    pub dtb: Option<u64>,
    /// Relative card address from CMD3.
    sd_rca: u32,
    /// `true` for high-capacity cards (block addressing).
    sd_high_capacity: bool,
}

impl RpiFw {
    /// Brings up the UART, the SD card, and reads the board revision.
    ///
    /// `dtb` is the pointer the firmware passed in `x0` (null when the
    /// config asked for none).
    pub fn new(dtb: u64) -> Self {
        let mmio_base = detect_mmio_base();
        crate::console::set_pl011(mmio_base);

        let mut fw = Self {
            mmio_base,
            emmc_base: mmio_base + EMMC_BASE,
            board_rev: 0,
            dtb: (dtb != 0).then_some(dtb),
            sd_rca: 0,
            sd_high_capacity: false,
        };
        fw.board_rev = fw.property_u32(0x0001_0002).unwrap_or(0);
        if let Err(err) = fw.sd_init() {
            log::warn!("SD init failed: {err}");
        }
        fw
    }

    // ── Mailbox property channel ─────────────────────────────────

    /// One property call with a single u32 response value.
    fn property_u32(&mut self, tag: u32) -> Option<u32> {
        self.property(tag, &[0], 1).map(|values| values[0])
    }

    /// Runs a property-channel transaction; returns up to 8 response
    /// words.
    fn property(&mut self, tag: u32, args: &[u32], response_words: usize) -> Option<[u32; 8]> {
        let mmio_base = self.mmio_base;
        MBOX.with(|buffer| {
            let msg = &mut buffer.0;
            let payload = args.len().max(response_words);
            msg.fill(0);
            msg[0] = (8 + payload as u32) * 4; // total size
            msg[1] = 0; // request
            msg[2] = tag;
            msg[3] = payload as u32 * 4;
            msg[4] = 0;
            msg[5..5 + args.len()].copy_from_slice(args);
            msg[5 + payload] = 0; // end tag

            let address = core::ptr::from_ref(msg) as u64;
            while mmio_read(mmio_base, MBOX_STATUS) & MBOX_FULL != 0 {
                core::hint::spin_loop();
            }
            crate::arch::aarch64::memory_barrier();
            mmio_write(
                mmio_base,
                MBOX_WRITE,
                (address as u32 & !0xF) | MBOX_CHANNEL_PROPERTY,
            );

            loop {
                while mmio_read(mmio_base, MBOX_STATUS) & MBOX_EMPTY != 0 {
                    core::hint::spin_loop();
                }
                let reply = mmio_read(mmio_base, MBOX_READ);
                if reply & 0xF == MBOX_CHANNEL_PROPERTY
                    && u64::from(reply & !0xF) == address & 0xFFFF_FFF0
                {
                    break;
                }
            }
            crate::arch::aarch64::memory_barrier();

            if msg[1] != 0x8000_0000 {
                return None;
            }
            let mut out = [0u32; 8];
            let count = response_words.min(8);
            out[..count].copy_from_slice(&msg[5..5 + count]);
            Some(out)
        })
    }

    // ── SD host controller ───────────────────────────────────────

    /// Issues one SD command and waits for completion.
    fn sd_command(&mut self, cmdtm: u32, arg: u32) -> Result<u32, BootError> {
        let base = self.emmc_base;
        mmio_write(base, EMMC_INTERRUPT, 0xFFFF_FFFF);
        mmio_write(base, EMMC_ARG1, arg);
        mmio_write(base, EMMC_CMDTM, cmdtm);

        let mut spins = 0u32;
        loop {
            let flags = mmio_read(base, EMMC_INTERRUPT);
            if flags & 0x8000 != 0 {
                return Err(BootError::IoError); // error interrupt
            }
            if flags & 0x1 != 0 {
                break; // command done
            }
            spins += 1;
            if spins > 1_000_000 {
                return Err(BootError::IoError);
            }
            core::hint::spin_loop();
        }
        Ok(mmio_read(base, EMMC_RESP0))
    }

    /// Card bring-up: CMD0 (idle), CMD8 (voltage check), ACMD41 until
    /// ready, CMD2 (CID), CMD3 (RCA), CMD7 (select).
    fn sd_init(&mut self) -> Result<(), BootError> {
        self.sd_command(0x0000_0000, 0)?; // CMD0: go idle
        delay_us(1000);

        // CMD8: 2.7-3.6V, check pattern 0xAA.
        let check = self.sd_command(0x0802_0000, 0x1AA)?;
        let v2_card = check & 0xFFF == 0x1AA;

        // ACMD41 loop: CMD55 then CMD41 with HCS for v2 cards.
        let mut spins = 0u32;
        loop {
            self.sd_command(0x3702_0000, 0)?; // CMD55
            let ocr = self.sd_command(
                0x2902_0000,
                if v2_card { 0x40FF_8000 } else { 0x00FF_8000 },
            )?;
            if ocr & 0x8000_0000 != 0 {
                self.sd_high_capacity = ocr & 0x4000_0000 != 0;
                break;
            }
            spins += 1;
            if spins > 1000 {
                return Err(BootError::IoError);
            }
            delay_us(1000);
        }

        self.sd_command(0x0201_0000, 0)?; // CMD2: all send CID
        let rca = self.sd_command(0x0302_0000, 0)?; // CMD3: send RCA
        self.sd_rca = rca & 0xFFFF_0000;
        self.sd_command(0x0703_0000, self.sd_rca)?; // CMD7: select card
        Ok(())
    }

    /// CMD17 single-block read.
    ///
    /// # Errors
    ///
    /// [`BootError::IoError`] on controller errors or timeouts.
    pub fn sector_read(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), BootError> {
        let address = if self.sd_high_capacity {
            lba as u32
        } else {
            (lba * SECTOR_SIZE as u64) as u32
        };
        // CMD17, 48-bit response, data, card-to-host.
        self.sd_command(0x1122_0010, address)?;

        let base = self.emmc_base;
        let mut spins = 0u32;
        // Wait for the read-ready interrupt.
        loop {
            let flags = mmio_read(base, EMMC_INTERRUPT);
            if flags & 0x8000 != 0 {
                return Err(BootError::IoError);
            }
            if flags & 0x20 != 0 {
                break;
            }
            spins += 1;
            if spins > 1_000_000 {
                return Err(BootError::IoError);
            }
            core::hint::spin_loop();
        }

        for chunk in buf.chunks_exact_mut(4) {
            let word = mmio_read(base, EMMC_DATA);
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        let _ = mmio_read(base, EMMC_STATUS);
        Ok(())
    }

    /// Framebuffer via the property channel: physical+virtual size,
    /// depth, then pitch and base.
    pub fn framebuffer_acquire(
        &mut self,
        width: u32,
        height: u32,
        bpp: u32,
    ) -> Option<FramebufferInfo> {
        let mmio_base = self.mmio_base;
        MBOX.with(|buffer| {
            let msg = &mut buffer.0;
            msg.fill(0);
            let mut at = 2;
            let mut tag = |msg: &mut [u32; 36], id: u32, values: &[u32]| {
                msg[at] = id;
                msg[at + 1] = values.len() as u32 * 4;
                msg[at + 2] = 0;
                msg[at + 3..at + 3 + values.len()].copy_from_slice(values);
                at += 3 + values.len();
            };
            tag(msg, 0x0004_8003, &[width, height]); // physical size
            tag(msg, 0x0004_8004, &[width, height]); // virtual size
            tag(msg, 0x0004_8005, &[bpp]); // depth
            tag(msg, 0x0004_8006, &[1]); // RGB order
            tag(msg, 0x0004_0001, &[4096, 0]); // allocate
            tag(msg, 0x0004_0008, &[0]); // get pitch
            msg[at] = 0;
            msg[0] = (at as u32 + 1) * 4;
            msg[1] = 0;

            let address = core::ptr::from_ref(msg) as u64;
            while mmio_read(mmio_base, MBOX_STATUS) & MBOX_FULL != 0 {
                core::hint::spin_loop();
            }
            crate::arch::aarch64::memory_barrier();
            mmio_write(
                mmio_base,
                MBOX_WRITE,
                (address as u32 & !0xF) | MBOX_CHANNEL_PROPERTY,
            );
            loop {
                while mmio_read(mmio_base, MBOX_STATUS) & MBOX_EMPTY != 0 {
                    core::hint::spin_loop();
                }
                let reply = mmio_read(mmio_base, MBOX_READ);
                if reply & 0xF == MBOX_CHANNEL_PROPERTY {
                    break;
                }
            }
            crate::arch::aarch64::memory_barrier();

            if msg[1] != 0x8000_0000 {
                return None;
            }
            // Response layout mirrors the request: the allocate tag's
            // value words are 23 (base) and 24 (size), the pitch tag's
            // value word is 28.
            let base = u64::from(msg[23] & 0x3FFF_FFFF); // bus -> ARM address
            let pitch = msg[28];
            if base == 0 || pitch == 0 {
                return None;
            }
            Some(FramebufferInfo {
                address: base,
                pitch,
                width,
                height,
                bpp: bpp as u8,
                red_position: 0,
                red_size: 8,
                green_position: 8,
                green_size: 8,
                blue_position: 16,
                blue_size: 8,
            })
        })
    }

    /// ARM/VC memory split via the property channel.
    ///
    /// # Errors
    ///
    /// [`BootError::IoError`] if the firmware refuses the query.
    pub fn memory_map(&mut self) -> Result<MemoryMap, BootError> {
        let mut map = MemoryMap::new();

        let arm = self.property(0x0001_0005, &[0, 0], 2).ok_or(BootError::IoError)?;
        map.entries.push(MmapEntry {
            base: u64::from(arm[0]),
            length: u64::from(arm[1]),
            kind: memory_kind::AVAILABLE,
            firmware_type: 0,
        });

        if let Some(vc) = self.property(0x0001_0006, &[0, 0], 2) {
            map.entries.push(MmapEntry {
                base: u64::from(vc[0]),
                length: u64::from(vc[1]),
                kind: memory_kind::RESERVED,
                firmware_type: 0,
            });
        }
        // The peripheral window is device memory.
        map.entries.push(MmapEntry {
            base: self.mmio_base,
            length: 0x100_0000,
            kind: memory_kind::RESERVED,
            firmware_type: 0,
        });
        Ok(map)
    }

    /// Any received UART byte counts as a key press.
    pub fn poll_key(&mut self) -> bool {
        // RXFE clear means a byte is waiting; drain it.
        if mmio_read(self.mmio_base, UART_BASE + UART_FR) & (1 << 4) == 0 {
            let _ = mmio_read(self.mmio_base, UART_BASE + UART_DR);
            return true;
        }
        false
    }

    /// The DTB is the only system table this firmware provides.
    pub fn find_system_tables(&mut self) -> SystemTables {
        SystemTables {
            rsdp: None,
            smbios: None,
            dtb: self.dtb,
        }
    }
}

/// Picks the peripheral base from the CPU part number: Cortex-A72 means
/// a Pi 4, everything else gets the Pi 2/3 base.
fn detect_mmio_base() -> u64 {
    let midr: u64;
    // SAFETY: MIDR_EL1 is always readable at EL1+.
    unsafe {
        core::arch::asm!("mrs {}, midr_el1", out(reg) midr, options(nomem, nostack, preserves_flags));
    }
    let part = (midr >> 4) & 0xFFF;
    if part == 0xD08 {
        MMIO_BASE_PI4
    } else {
        MMIO_BASE_PI3
    }
}
