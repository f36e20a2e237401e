/*
  hdw/bus.rs
  Info: Guest address-space dispatch and subsystem clock fan-out
  Description: The bus module owns every addressable component and routes CPU
              reads and writes across the 64 KiB guest address space:

              0000-3FFF  cartridge ROM bank 0 (boot ROM overlay while enabled)
              4000-7FFF  cartridge ROM, switchable bank
              8000-9FFF  video RAM
              A000-BFFF  cartridge external RAM, switchable bank
              C000-DFFF  work RAM
              E000-FDFF  echo of C000-DDFF
              FE00-FE9F  object attribute memory
              FEA0-FEFF  unusable (reads 0xFF, writes dropped)
              FF00-FF7F  I/O registers (routed through hdw::io)
              FF80-FFFE  high RAM
              FFFF       interrupt enable register

              The bus also forwards elapsed clocks to the timer, PPU, audio
              unit and the OAM DMA engine after each CPU step, and enforces
              the DMA bus lockout: while a transfer runs, CPU reads outside
              high RAM return 0xFF.
*/

use log::debug;
use std::sync::Once;

use crate::hdw::apu::AudioSystem;
use crate::hdw::cart::Cartridge;
use crate::hdw::dma::OamDma;
use crate::hdw::gamepad::GamePad;
use crate::hdw::interrupts::InterruptController;
use crate::hdw::io;
use crate::hdw::ppu::Ppu;
use crate::hdw::ram::Ram;
use crate::hdw::serial::Serial;
use crate::hdw::timer::Timer;

pub const BOOT_ROM_SIZE: usize = 0x100;

static UNUSABLE_READ_ONCE: Once = Once::new();
static UNUSABLE_WRITE_ONCE: Once = Once::new();

pub struct Bus {
    pub cart: Cartridge,
    pub ram: Ram,
    pub ppu: Ppu,
    pub apu: AudioSystem,
    pub timer: Timer,
    pub gamepad: GamePad,
    pub interrupt_controller: InterruptController,
    pub dma: OamDma,
    pub serial: Serial,

    boot_rom: Option<[u8; BOOT_ROM_SIZE]>,
    pub boot_active: bool,
}

impl Bus {
    pub fn new(cart: Cartridge, boot_rom: Option<[u8; BOOT_ROM_SIZE]>) -> Self {
        let boot_active = boot_rom.is_some();
        Bus {
            cart,
            ram: Ram::new(),
            ppu: Ppu::new(),
            apu: AudioSystem::new(),
            timer: Timer::new(),
            gamepad: GamePad::new(),
            interrupt_controller: InterruptController::new(),
            dma: OamDma::new(),
            serial: Serial::new(),
            boot_rom,
            boot_active,
        }
    }

    // CPU-visible read. During OAM DMA everything except high RAM reads as
    // open bus.
    pub fn read_byte(&self, address: u16) -> u8 {
        if self.dma.transferring() && !(0xFF80..=0xFFFE).contains(&address) {
            return 0xFF;
        }
        self.peek(address)
    }

    // Read without the DMA lockout. Used by the DMA engine's source fetches
    // and by debugger-style inspection.
    pub fn peek(&self, address: u16) -> u8 {
        match address {
            0x0000..=0x00FF if self.boot_active => self.boot_rom.as_ref().unwrap()[address as usize],
            0x0000..=0x7FFF => self.cart.read_rom(address),
            0x8000..=0x9FFF => self.ppu.vram_read(address),
            0xA000..=0xBFFF => self.cart.read_ram(address),
            0xC000..=0xFDFF => self.ram.wram_read(address),
            0xFE00..=0xFE9F => self.ppu.oam_read(address),
            0xFEA0..=0xFEFF => {
                UNUSABLE_READ_ONCE.call_once(|| {
                    debug!("read from unusable region at {:#06X}", address);
                });
                0xFF
            }
            0xFF00..=0xFF7F | 0xFFFF => io::io_read(self, address),
            0xFF80..=0xFFFE => self.ram.hram_read(address),
        }
    }

    pub fn write_byte(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x7FFF => self.cart.handle_rom_write(address, value),
            0x8000..=0x9FFF => self.ppu.vram_write(address, value),
            0xA000..=0xBFFF => self.cart.write_ram(address, value),
            0xC000..=0xFDFF => self.ram.wram_write(address, value),
            0xFE00..=0xFE9F => self.ppu.oam_write(address, value),
            0xFEA0..=0xFEFF => {
                UNUSABLE_WRITE_ONCE.call_once(|| {
                    debug!("write to unusable region at {:#06X}", address);
                });
            }
            0xFF00..=0xFF7F | 0xFFFF => io::io_write(self, address, value),
            0xFF80..=0xFFFE => self.ram.hram_write(address, value),
        }
    }

    // Unmap the boot ROM. Monotonic: once disabled it never returns until
    // power cycle, and the cartridge header is re-read so the mapper
    // configuration reflects the real ROM contents.
    pub fn disable_boot_rom(&mut self) {
        if self.boot_active {
            self.boot_active = false;
            self.cart.reconfigure_from_header();
        }
    }

    // Forward a CPU step's clocks to everything time-driven.
    pub fn tick(&mut self, clocks: u32) {
        self.timer.tick(clocks, &mut self.interrupt_controller);
        self.ppu.tick(clocks, &mut self.interrupt_controller);
        self.apu.tick(clocks);

        // One DMA byte per M-cycle.
        for _ in 0..clocks / 4 {
            if !self.dma.transferring() {
                break;
            }
            let value = self.peek(self.dma.source_address());
            self.ppu.oam_write(0xFE00 | self.dma.offset as u16, value);
            self.dma.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdw::cart::ROM_BANK_SIZE;

    fn make_bus() -> Bus {
        let mut rom = vec![0u8; 4 * ROM_BANK_SIZE];
        rom[0x0147] = 0x00; // no mapper
        rom[0x0148] = 0x01; // 4 banks
        rom[0x0100] = 0xAA;
        let mut cart = Cartridge::new();
        cart.load_bytes(rom).unwrap();
        Bus::new(cart, None)
    }

    #[test]
    fn echo_ram_mirrors_through_bus() {
        let mut bus = make_bus();
        bus.write_byte(0xC200, 0x5A);
        assert_eq!(bus.read_byte(0xE200), 0x5A);
        bus.write_byte(0xF000, 0xA5);
        assert_eq!(bus.read_byte(0xD000), 0xA5);
    }

    #[test]
    fn unusable_region_reads_ff_ignores_writes() {
        let mut bus = make_bus();
        bus.write_byte(0xFEA5, 0x12);
        assert_eq!(bus.read_byte(0xFEA5), 0xFF);
    }

    #[test]
    fn unlisted_io_reads_ff() {
        let bus = make_bus();
        assert_eq!(bus.read_byte(0xFF4C), 0xFF);
        assert_eq!(bus.read_byte(0xFF7F), 0xFF);
        assert_eq!(bus.read_byte(0xFF03), 0xFF);
    }

    #[test]
    fn oam_dma_copies_160_bytes() {
        let mut bus = make_bus();
        for i in 0..0xA0u16 {
            bus.write_byte(0xC000 + i, (i + 1) as u8);
        }
        // A marker just past the source window must not be copied.
        bus.write_byte(0xC0A0, 0xEE);

        bus.write_byte(0xFF46, 0xC0);
        assert!(bus.dma.transferring());

        // 160 M-cycles moves the whole table.
        bus.tick(160 * 4);
        assert!(!bus.dma.transferring());
        for i in 0..0xA0u16 {
            assert_eq!(bus.read_byte(0xFE00 + i), (i + 1) as u8);
        }
        // Source memory unchanged.
        assert_eq!(bus.read_byte(0xC05F), 0x60);
        assert_eq!(bus.read_byte(0xC0A0), 0xEE);
    }

    #[test]
    fn dma_locks_out_non_hram_reads() {
        let mut bus = make_bus();
        bus.write_byte(0xC000, 0x77);
        bus.write_byte(0xFF80, 0x33);
        bus.write_byte(0xFF46, 0xC0);

        assert_eq!(bus.read_byte(0xC000), 0xFF);
        assert_eq!(bus.read_byte(0x0100), 0xFF);
        assert_eq!(bus.read_byte(0xFF80), 0x33);

        bus.tick(160 * 4);
        assert_eq!(bus.read_byte(0xC000), 0x77);
        assert_eq!(bus.read_byte(0x0100), 0xAA);
    }

    #[test]
    fn dma_offset_visible_while_transferring() {
        let mut bus = make_bus();
        bus.write_byte(0xFF46, 0xC0);
        assert_eq!(bus.dma.offset, 0);
        bus.tick(4);
        assert_eq!(bus.dma.offset, 1);
        bus.tick(8);
        assert_eq!(bus.dma.offset, 3);
    }

    #[test]
    fn boot_rom_overlay_and_monotonic_disable() {
        let mut rom = vec![0u8; 2 * ROM_BANK_SIZE];
        rom[0x0000] = 0xAA; // cartridge byte under the overlay
        let mut cart = Cartridge::new();
        cart.load_bytes(rom).unwrap();

        let mut boot = [0u8; BOOT_ROM_SIZE];
        boot[0x0000] = 0x31;
        let mut bus = Bus::new(cart, Some(boot));

        assert_eq!(bus.read_byte(0x0000), 0x31);
        // Above the overlay the cartridge shows through.
        assert_eq!(bus.read_byte(0x0100), 0x00);

        bus.write_byte(0xFF50, 0x01);
        assert_eq!(bus.read_byte(0x0000), 0xAA);

        // No way back.
        bus.write_byte(0xFF50, 0x00);
        assert_eq!(bus.read_byte(0x0000), 0xAA);
    }

    #[test]
    fn ie_register_via_bus() {
        let mut bus = make_bus();
        bus.write_byte(0xFFFF, 0x15);
        assert_eq!(bus.read_byte(0xFFFF), 0x15);
    }
}
