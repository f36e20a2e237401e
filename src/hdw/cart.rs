/*
  hdw/cart.rs
  Info: Cartridge image and Memory Bank Controller (MBC) implementation
  Description: The cart module implements cartridge emulation: ROM loading, header
              parsing, bank switching for the MBC1/MBC2/MBC3/MBC5 controller
              families, MBC3 real-time-clock registers, and battery-backed save
              RAM persistence.

  CartridgeHeader Struct Members:
    rom_title: 16-byte ASCII title from the header
    cart_type: Mapper/extra-hardware type code (0x0147)
    rom_size: ROM size code (0x0148) - bank count = 2 << code
    ram_size: RAM size code (0x0149) - external RAM bank count
    dest_code: Destination code (0x014A)
    old_lic_code: Legacy publisher code (0x014B)
    version: Game revision (0x014C)
    checksum: Header checksum (0x014D) - verified and logged, not fatal

  Cartridge Struct Members:
    file_name: ROM path, used to derive the battery save file name
    rom_data: Full ROM image
    rom_header: Parsed header fields
    mbc: Mapper kind decoded from cart_type
    rom_bank_lo / rom_bank_hi: Bank register halves (meaning varies per mapper)
    ram_bank: Current external RAM bank index
    ram_enabled: External RAM access latch
    mbc1_ram_mode: MBC1 banking mode (0 = ROM banking, 1 = RAM banking)
    ram_banks: External RAM, banks contiguous in order
    battery: Header declared battery backup
    need_save: RAM dirtied since the last battery write

  MBC register write map (ROM-region writes are mapper commands):
    0x0000-0x1FFF  RAM enable (low nibble 0x0A enables)       MBC1/3/5
    0x0000-0x3FFF  RAM enable / ROM bank split on addr bit 8  MBC2
    0x2000-0x3FFF  ROM bank low bits (0 promoted to 1)        MBC1/2/3
    0x2000-0x2FFF  ROM bank low 8 bits (0 legal)              MBC5
    0x3000-0x3FFF  ROM bank bit 8                             MBC5
    0x4000-0x5FFF  RAM bank / ROM bank high bits / RTC select
    0x6000-0x7FFF  MBC1 mode select; MBC3 RTC latch (0 -> 1)

  Battery persistence: when the header declares battery, the RAM bank array is
  written verbatim to "<rom path>.sav" on shutdown and read back on start when
  the file size matches exactly.
*/

use chrono::Utc;
use lazy_static::lazy_static;
use log::{error, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

pub const ROM_BANK_SIZE: usize = 0x4000;
pub const RAM_BANK_SIZE: usize = 0x2000;
pub const MBC2_RAM_SIZE: usize = 0x200;

lazy_static! {
    static ref CART_TYPE_NAMES: HashMap<u8, &'static str> = {
        let mut m = HashMap::new();
        m.insert(0x00, "ROM ONLY");
        m.insert(0x01, "MBC1");
        m.insert(0x02, "MBC1+RAM");
        m.insert(0x03, "MBC1+RAM+BATTERY");
        m.insert(0x05, "MBC2");
        m.insert(0x06, "MBC2+BATTERY");
        m.insert(0x08, "ROM+RAM");
        m.insert(0x09, "ROM+RAM+BATTERY");
        m.insert(0x0F, "MBC3+TIMER+BATTERY");
        m.insert(0x10, "MBC3+TIMER+RAM+BATTERY");
        m.insert(0x11, "MBC3");
        m.insert(0x12, "MBC3+RAM");
        m.insert(0x13, "MBC3+RAM+BATTERY");
        m.insert(0x19, "MBC5");
        m.insert(0x1A, "MBC5+RAM");
        m.insert(0x1B, "MBC5+RAM+BATTERY");
        m.insert(0x1C, "MBC5+RUMBLE");
        m.insert(0x1D, "MBC5+RUMBLE+RAM");
        m.insert(0x1E, "MBC5+RUMBLE+RAM+BATTERY");
        m
    };
}

// Mapper families, decoded once from the header type code. All banking
// decisions match on this instead of re-testing code ranges.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MbcKind {
    None,
    Mbc1,
    Mbc2,
    Mbc3 { rtc: bool },
    Mbc5,
}

pub struct CartridgeHeader {
    pub rom_title: [u8; 16],
    pub cart_type: u8,
    pub rom_size: u8,
    pub ram_size: u8,
    pub dest_code: u8,
    pub old_lic_code: u8,
    pub version: u8,
    pub checksum: u8,
}

impl CartridgeHeader {
    fn new() -> Self {
        CartridgeHeader {
            rom_title: [0; 16],
            cart_type: 0,
            rom_size: 0,
            ram_size: 0,
            dest_code: 0,
            old_lic_code: 0,
            version: 0,
            checksum: 0,
        }
    }

    fn parse(rom_data: &[u8]) -> Result<Self, String> {
        if rom_data.len() < 0x0150 {
            return Err(format!(
                "ROM image too small for a cartridge header: {} bytes",
                rom_data.len()
            ));
        }
        let mut rom_title = [0u8; 16];
        rom_title.copy_from_slice(&rom_data[0x0134..0x0144]);
        Ok(CartridgeHeader {
            rom_title,
            cart_type: rom_data[0x0147],
            rom_size: rom_data[0x0148],
            ram_size: rom_data[0x0149],
            dest_code: rom_data[0x014A],
            old_lic_code: rom_data[0x014B],
            version: rom_data[0x014C],
            checksum: rom_data[0x014D],
        })
    }

    pub fn rom_bank_count(&self) -> usize {
        2usize << self.rom_size
    }

    pub fn ram_bank_count(&self) -> usize {
        match self.ram_size {
            0x02 => 1,
            0x03 => 4,
            0x04 => 16,
            0x05 => 8,
            _ => 0,
        }
    }

    pub fn title(&self) -> String {
        std::str::from_utf8(&self.rom_title)
            .unwrap_or("")
            .trim_end_matches('\0')
            .to_string()
    }
}

pub struct Cartridge {
    file_name: String,
    rom_data: Vec<u8>,
    pub rom_header: CartridgeHeader,
    pub mbc: MbcKind,

    rom_bank_lo: u8,
    rom_bank_hi: u8,
    pub ram_bank: usize,
    pub ram_enabled: bool,
    mbc1_ram_mode: u8,
    ram_banks: Vec<u8>,
    battery: bool,
    need_save: bool,

    // MBC3 RTC state: live registers (S, M, H, DL, DH), the latched copy
    // games actually read, and the wall-clock reference point.
    rtc_registers: [u8; 5],
    rtc_latched: [u8; 5],
    rtc_latch_state: u8,
    rtc_selected: bool,
    rtc_register_select: u8,
    rtc_last_timestamp: i64,
}

impl Cartridge {
    pub fn new() -> Cartridge {
        Cartridge {
            file_name: String::new(),
            rom_data: Vec::new(),
            rom_header: CartridgeHeader::new(),
            mbc: MbcKind::None,
            rom_bank_lo: 1,
            rom_bank_hi: 0,
            ram_bank: 0,
            ram_enabled: false,
            mbc1_ram_mode: 0,
            ram_banks: Vec::new(),
            battery: false,
            need_save: false,
            rtc_registers: [0; 5],
            rtc_latched: [0; 5],
            rtc_latch_state: 0xFF,
            rtc_selected: false,
            rtc_register_select: 0x08,
            rtc_last_timestamp: 0,
        }
    }

    // Load a ROM image from disk, parse its header and set up banking.
    pub fn load_cart(&mut self, file_path: &str) -> Result<(), String> {
        self.file_name = file_path.to_string();

        let mut file = File::open(file_path)
            .map_err(|e| format!("Failed to open {}: {}", file_path, e))?;

        let rom_size = file
            .metadata()
            .map_err(|e| format!("Failed to stat {}: {}", file_path, e))?
            .len() as usize;

        file.seek(SeekFrom::Start(0))
            .map_err(|e| format!("Failed to rewind {}: {}", file_path, e))?;

        let mut rom_data = vec![0u8; rom_size];
        file.read_exact(&mut rom_data)
            .map_err(|e| format!("Failed to read {}: {}", file_path, e))?;

        self.load_bytes(rom_data)?;

        if self.battery {
            self.load_battery();
        }
        Ok(())
    }

    // Header parse and banking setup from an in-memory image. Split from
    // load_cart so the file system stays out of the core path.
    pub fn load_bytes(&mut self, rom_data: Vec<u8>) -> Result<(), String> {
        self.rom_data = rom_data;
        self.rom_header = CartridgeHeader::parse(&self.rom_data)?;
        self.mbc = Self::decode_mbc(self.rom_header.cart_type)?;
        self.battery = matches!(
            self.rom_header.cart_type,
            0x03 | 0x06 | 0x09 | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E
        );
        self.need_save = false;
        self.setup_banking();
        self.checksum_test();
        self.print_info();
        Ok(())
    }

    fn decode_mbc(cart_type: u8) -> Result<MbcKind, String> {
        match cart_type {
            0x00 | 0x08 | 0x09 => Ok(MbcKind::None),
            0x01..=0x03 => Ok(MbcKind::Mbc1),
            0x05 | 0x06 => Ok(MbcKind::Mbc2),
            0x0F | 0x10 => Ok(MbcKind::Mbc3 { rtc: true }),
            0x11..=0x13 => Ok(MbcKind::Mbc3 { rtc: false }),
            0x19..=0x1E => Ok(MbcKind::Mbc5),
            _ => Err(format!("Unsupported cartridge type {:#04X}", cart_type)),
        }
    }

    fn setup_banking(&mut self) {
        let ram_size = if self.mbc == MbcKind::Mbc2 {
            // MBC2 carries built-in 512x4-bit RAM regardless of the header.
            MBC2_RAM_SIZE
        } else {
            self.rom_header.ram_bank_count() * RAM_BANK_SIZE
        };
        self.ram_banks = vec![0u8; ram_size];

        self.rom_bank_lo = 1;
        self.rom_bank_hi = 0;
        self.ram_bank = 0;
        // Mapperless carts have no enable latch; their RAM is always live.
        self.ram_enabled = self.mbc == MbcKind::None && !self.ram_banks.is_empty();
        self.mbc1_ram_mode = 0;

        if let MbcKind::Mbc3 { rtc: true } = self.mbc {
            self.rtc_last_timestamp = Utc::now().timestamp();
        }
    }

    // Called when the boot ROM is unmapped: the header bytes became visible
    // in their final form, so mapper type and bank counts are re-derived.
    pub fn reconfigure_from_header(&mut self) {
        if let Ok(header) = CartridgeHeader::parse(&self.rom_data) {
            if header.cart_type != self.rom_header.cart_type {
                match Self::decode_mbc(header.cart_type) {
                    Ok(mbc) => {
                        self.mbc = mbc;
                        self.rom_header = header;
                        self.setup_banking();
                    }
                    Err(e) => error!("Header reconfigure failed: {}", e),
                }
            } else {
                self.rom_header = header;
            }
        }
    }

    fn print_info(&self) {
        info!("Cartridge information:");
        info!("  Title        : {}", self.rom_header.title());
        info!(
            "  Type         : {:#04X} ({})",
            self.rom_header.cart_type,
            CART_TYPE_NAMES
                .get(&self.rom_header.cart_type)
                .unwrap_or(&"UNKNOWN")
        );
        info!(
            "  ROM          : {} KiB, {} banks",
            32 << self.rom_header.rom_size,
            self.rom_header.rom_bank_count()
        );
        info!(
            "  RAM          : code {:#04X}, {} banks",
            self.rom_header.ram_size,
            self.rom_header.ram_bank_count()
        );
        info!(
            "  Region       : {}",
            if self.rom_header.dest_code == 0x00 {
                "Japan"
            } else {
                "Overseas"
            }
        );
        info!("  Licensee     : {:#04X}", self.rom_header.old_lic_code);
        info!("  Version      : {:#04X}", self.rom_header.version);
        info!("  Battery      : {}", self.battery);
    }

    fn checksum_test(&self) {
        let mut checksum: u8 = 0;
        for address in 0x0134..=0x014C {
            checksum = checksum.wrapping_sub(self.rom_data[address]).wrapping_sub(1);
        }
        if checksum == self.rom_header.checksum {
            info!("  Checksum     : {:#04X} (ok)", checksum);
        } else {
            warn!(
                "  Checksum     : computed {:#04X}, header {:#04X} (mismatch)",
                checksum, self.rom_header.checksum
            );
        }
    }

    pub fn has_battery(&self) -> bool {
        self.battery
    }

    // Currently mapped switchable ROM bank, derived from the bank register
    // halves according to the mapper family.
    pub fn current_rom_bank(&self) -> usize {
        let bank = match self.mbc {
            MbcKind::None => 1,
            MbcKind::Mbc1 => ((self.rom_bank_hi as usize & 0x03) << 5) | (self.rom_bank_lo as usize & 0x1F),
            MbcKind::Mbc2 => self.rom_bank_lo as usize & 0x0F,
            MbcKind::Mbc3 { .. } => self.rom_bank_lo as usize & 0x7F,
            MbcKind::Mbc5 => ((self.rom_bank_hi as usize & 0x01) << 8) | self.rom_bank_lo as usize,
        };
        bank % self.rom_header.rom_bank_count().max(1)
    }

    // Reads in 0x0000-0x7FFF. The low window always shows bank 0; the high
    // window shows the selected bank.
    pub fn read_rom(&self, address: u16) -> u8 {
        let index = if address < 0x4000 {
            address as usize
        } else {
            self.current_rom_bank() * ROM_BANK_SIZE + (address as usize - 0x4000)
        };
        if index < self.rom_data.len() {
            self.rom_data[index]
        } else {
            0xFF
        }
    }

    // A write into the ROM region is a command to the mapper.
    pub fn handle_rom_write(&mut self, address: u16, value: u8) {
        match self.mbc {
            MbcKind::None => {}
            MbcKind::Mbc1 => match address {
                0x0000..=0x1FFF => self.ram_enabled = value & 0x0F == 0x0A,
                0x2000..=0x3FFF => {
                    let mut bank = value & 0x1F;
                    if bank == 0 {
                        bank = 1;
                    }
                    self.rom_bank_lo = bank;
                }
                0x4000..=0x5FFF => {
                    self.rom_bank_hi = value & 0x03;
                    if self.mbc1_ram_mode == 1 {
                        self.ram_bank = (value & 0x03) as usize;
                    }
                }
                0x6000..=0x7FFF => {
                    self.mbc1_ram_mode = value & 0x01;
                    if self.mbc1_ram_mode == 0 {
                        self.ram_bank = 0;
                    } else {
                        self.ram_bank = (self.rom_bank_hi & 0x03) as usize;
                    }
                }
                _ => {}
            },
            MbcKind::Mbc2 => {
                if address < 0x4000 {
                    // Address bit 8 discriminates the shared register range:
                    // clear = RAM enable, set = ROM bank select.
                    if address & 0x0100 == 0 {
                        self.ram_enabled = value & 0x0F == 0x0A;
                    } else {
                        let mut bank = value & 0x0F;
                        if bank == 0 {
                            bank = 1;
                        }
                        self.rom_bank_lo = bank;
                    }
                }
            }
            MbcKind::Mbc3 { rtc } => match address {
                0x0000..=0x1FFF => self.ram_enabled = value & 0x0F == 0x0A,
                0x2000..=0x3FFF => {
                    let mut bank = value & 0x7F;
                    if bank == 0 {
                        bank = 1;
                    }
                    self.rom_bank_lo = bank;
                }
                0x4000..=0x5FFF => {
                    if rtc && (0x08..=0x0C).contains(&value) {
                        self.rtc_selected = true;
                        self.rtc_register_select = value;
                    } else {
                        self.rtc_selected = false;
                        self.ram_bank = (value & 0x03) as usize;
                    }
                }
                0x6000..=0x7FFF => {
                    if rtc {
                        // Writing 0 then 1 freezes the live clock into the
                        // latched copy.
                        if self.rtc_latch_state == 0 && value == 1 {
                            self.update_rtc_time();
                            self.rtc_latched = self.rtc_registers;
                        }
                        self.rtc_latch_state = value;
                    }
                }
                _ => {}
            },
            MbcKind::Mbc5 => match address {
                0x0000..=0x1FFF => self.ram_enabled = value & 0x0F == 0x0A,
                // Bank 0 is legal here, unlike the earlier mappers.
                0x2000..=0x2FFF => self.rom_bank_lo = value,
                0x3000..=0x3FFF => self.rom_bank_hi = value & 0x01,
                0x4000..=0x5FFF => self.ram_bank = (value & 0x0F) as usize,
                _ => {}
            },
        }
    }

    // External RAM reads in 0xA000-0xBFFF.
    pub fn read_ram(&self, address: u16) -> u8 {
        if !self.ram_enabled {
            return 0xFF;
        }

        match self.mbc {
            MbcKind::Mbc2 => {
                let offset = (address as usize - 0xA000) % MBC2_RAM_SIZE;
                // Only the low nibble is backed by storage.
                self.ram_banks[offset] & 0x0F | 0xF0
            }
            MbcKind::Mbc3 { rtc: true } if self.rtc_selected => {
                let index = (self.rtc_register_select - 0x08) as usize;
                self.rtc_latched[index]
            }
            _ => {
                let offset = self.ram_bank * RAM_BANK_SIZE + (address as usize - 0xA000);
                if offset < self.ram_banks.len() {
                    self.ram_banks[offset]
                } else {
                    0xFF
                }
            }
        }
    }

    // External RAM writes in 0xA000-0xBFFF; silently dropped while disabled.
    pub fn write_ram(&mut self, address: u16, value: u8) {
        if !self.ram_enabled {
            return;
        }

        match self.mbc {
            MbcKind::Mbc2 => {
                let offset = (address as usize - 0xA000) % MBC2_RAM_SIZE;
                self.ram_banks[offset] = value & 0x0F;
                self.need_save = true;
            }
            MbcKind::Mbc3 { rtc: true } if self.rtc_selected => {
                let index = (self.rtc_register_select - 0x08) as usize;
                self.rtc_registers[index] = value;
            }
            _ => {
                let offset = self.ram_bank * RAM_BANK_SIZE + (address as usize - 0xA000);
                if offset < self.ram_banks.len() {
                    self.ram_banks[offset] = value;
                    self.need_save = true;
                }
            }
        }
    }

    // Fold wall-clock time elapsed since the last update into the RTC
    // registers, honoring the halt flag in DH bit 6.
    fn update_rtc_time(&mut self) {
        if self.rtc_registers[4] & 0x40 != 0 {
            return;
        }

        let now = Utc::now().timestamp();
        let elapsed = (now - self.rtc_last_timestamp).max(0) as u64;
        self.rtc_last_timestamp = now;

        let mut seconds = self.rtc_registers[0] as u64
            + self.rtc_registers[1] as u64 * 60
            + self.rtc_registers[2] as u64 * 3600
            + (((self.rtc_registers[4] as u64 & 0x01) << 8) | self.rtc_registers[3] as u64) * 86400
            + elapsed;

        self.rtc_registers[0] = (seconds % 60) as u8;
        seconds /= 60;
        self.rtc_registers[1] = (seconds % 60) as u8;
        seconds /= 60;
        self.rtc_registers[2] = (seconds % 24) as u8;
        let days = seconds / 24;
        self.rtc_registers[3] = (days & 0xFF) as u8;
        let mut dh = self.rtc_registers[4] & 0xFE;
        dh |= ((days >> 8) & 0x01) as u8;
        if days > 0x1FF {
            // Day counter carry is sticky until software clears it.
            dh |= 0x80;
        }
        self.rtc_registers[4] = dh;
    }

    fn battery_path(&self) -> String {
        format!("{}.sav", self.file_name)
    }

    pub fn load_battery(&mut self) {
        let path = self.battery_path();
        match std::fs::read(&path) {
            Ok(data) => {
                if data.len() == self.ram_banks.len() {
                    self.ram_banks.copy_from_slice(&data);
                    info!("Loaded battery RAM from {}", path);
                } else {
                    warn!(
                        "Battery file {} is {} bytes, expected {}; ignoring",
                        path,
                        data.len(),
                        self.ram_banks.len()
                    );
                }
            }
            Err(_) => info!("No battery file at {}", path),
        }
    }

    pub fn save_battery(&mut self) {
        if !self.battery || self.ram_banks.is_empty() {
            return;
        }
        let path = self.battery_path();
        match std::fs::write(&path, &self.ram_banks) {
            Ok(()) => {
                info!("Saved battery RAM to {}", path);
                self.need_save = false;
            }
            Err(e) => error!("Failed to write battery file {}: {}", path, e),
        }
    }

    // Snapshot plumbing: the mapper registers and RAM image in a stable order.
    pub fn snapshot_fields(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.ram_banks.len());
        out.push(self.rom_bank_lo);
        out.push(self.rom_bank_hi);
        out.push(self.ram_bank as u8);
        out.push(self.ram_enabled as u8);
        out.push(self.mbc1_ram_mode);
        out.extend_from_slice(&self.rtc_registers);
        out.extend_from_slice(&self.rtc_latched);
        out.push(self.rtc_latch_state);
        out.push(self.rtc_selected as u8);
        out.push(self.rtc_register_select);
        out.extend_from_slice(&(self.ram_banks.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.ram_banks);
        out
    }

    pub fn restore_fields(&mut self, data: &[u8]) -> Result<(), String> {
        if data.len() < 22 {
            return Err("mapper section truncated".into());
        }
        let ram_len = u32::from_le_bytes([data[18], data[19], data[20], data[21]]) as usize;
        if data.len() != 22 + ram_len || ram_len != self.ram_banks.len() {
            return Err("mapper section RAM size mismatch".into());
        }
        self.rom_bank_lo = data[0];
        self.rom_bank_hi = data[1];
        self.ram_bank = data[2] as usize;
        self.ram_enabled = data[3] != 0;
        self.mbc1_ram_mode = data[4];
        self.rtc_registers.copy_from_slice(&data[5..10]);
        self.rtc_latched.copy_from_slice(&data[10..15]);
        self.rtc_latch_state = data[15];
        self.rtc_selected = data[16] != 0;
        self.rtc_register_select = data[17];
        self.ram_banks.copy_from_slice(&data[22..]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal synthetic image: header at 0x100, bank-count-sized ROM where
    // every byte of bank N is N.
    fn make_rom(cart_type: u8, rom_size_code: u8, ram_size_code: u8) -> Vec<u8> {
        let banks = 2usize << rom_size_code;
        let mut rom = vec![0u8; banks * ROM_BANK_SIZE];
        for (bank, chunk) in rom.chunks_mut(ROM_BANK_SIZE).enumerate() {
            for b in chunk.iter_mut() {
                *b = bank as u8;
            }
        }
        rom[0x0147] = cart_type;
        rom[0x0148] = rom_size_code;
        rom[0x0149] = ram_size_code;
        rom
    }

    fn make_cart(cart_type: u8, rom_size_code: u8, ram_size_code: u8) -> Cartridge {
        let mut cart = Cartridge::new();
        cart.load_bytes(make_rom(cart_type, rom_size_code, ram_size_code))
            .unwrap();
        cart
    }

    #[test]
    fn unsupported_mapper_is_refused() {
        let mut cart = Cartridge::new();
        assert!(cart.load_bytes(make_rom(0xFC, 1, 0)).is_err());
    }

    #[test]
    fn mapperless_ram_needs_no_enable() {
        let mut cart = make_cart(0x09, 1, 0x02); // ROM+RAM+BATTERY
        cart.write_ram(0xA000, 0x5A);
        assert_eq!(cart.read_ram(0xA000), 0x5A);
        // Control writes are ignored outright.
        cart.handle_rom_write(0x2000, 0x02);
        assert_eq!(cart.read_rom(0x4000), 1);
    }

    #[test]
    fn mbc1_bank_select_and_promotion() {
        let mut cart = make_cart(0x03, 2, 0x03); // MBC1+RAM+BATTERY, 8 banks
        cart.handle_rom_write(0x0000, 0x0A);
        assert!(cart.ram_enabled);

        cart.handle_rom_write(0x2000, 0x02);
        assert_eq!(cart.read_rom(0x4000), 2);

        // Bank register 0 is promoted to 1, never bank 0.
        cart.handle_rom_write(0x2000, 0x00);
        assert_eq!(cart.read_rom(0x4000), 1);
    }

    #[test]
    fn low_window_ignores_bank_register() {
        let mut cart = make_cart(0x01, 2, 0);
        cart.handle_rom_write(0x2000, 0x05);
        assert_eq!(cart.read_rom(0x0000), 0);
        assert_eq!(cart.read_rom(0x3FFF), 0);
        assert_eq!(cart.read_rom(0x4000), 5);
    }

    #[test]
    fn mbc1_ram_banking_mode() {
        let mut cart = make_cart(0x03, 2, 0x03);
        cart.handle_rom_write(0x0000, 0x0A);
        cart.handle_rom_write(0x6000, 0x01); // RAM banking mode
        cart.handle_rom_write(0x4000, 0x02); // RAM bank 2
        cart.write_ram(0xA000, 0x77);
        assert_eq!(cart.ram_bank, 2);
        assert_eq!(cart.read_ram(0xA000), 0x77);

        cart.handle_rom_write(0x4000, 0x00);
        assert_eq!(cart.read_ram(0xA000), 0x00);
    }

    #[test]
    fn ram_disabled_reads_ff_and_drops_writes() {
        let mut cart = make_cart(0x03, 1, 0x02);
        cart.write_ram(0xA010, 0x55);
        assert_eq!(cart.read_ram(0xA010), 0xFF);

        cart.handle_rom_write(0x0000, 0x0A);
        assert_eq!(cart.read_ram(0xA010), 0x00);
        cart.write_ram(0xA010, 0x55);
        assert_eq!(cart.read_ram(0xA010), 0x55);

        cart.handle_rom_write(0x0000, 0x00);
        assert_eq!(cart.read_ram(0xA010), 0xFF);
    }

    #[test]
    fn mbc2_address_bit8_discriminates() {
        let mut cart = make_cart(0x06, 2, 0);
        // Bit 8 clear: RAM enable.
        cart.handle_rom_write(0x0000, 0x0A);
        assert!(cart.ram_enabled);
        // Bit 8 set: ROM bank select, with 0 -> 1 promotion.
        cart.handle_rom_write(0x0100, 0x03);
        assert_eq!(cart.read_rom(0x4000), 3);
        cart.handle_rom_write(0x0100, 0x00);
        assert_eq!(cart.read_rom(0x4000), 1);

        // A write with bit 8 clear lands on the RAM enable, not the bank.
        cart.handle_rom_write(0x2000, 0x02);
        assert!(!cart.ram_enabled);
        assert_eq!(cart.read_rom(0x4000), 1);
    }

    #[test]
    fn mbc2_ram_nibbles() {
        let mut cart = make_cart(0x06, 1, 0);
        cart.handle_rom_write(0x0000, 0x0A);
        cart.write_ram(0xA005, 0xFF);
        assert_eq!(cart.read_ram(0xA005), 0xFF);
        cart.write_ram(0xA005, 0x03);
        assert_eq!(cart.read_ram(0xA005), 0xF3);
    }

    #[test]
    fn mbc5_nine_bit_bank_and_bank_zero() {
        let mut cart = make_cart(0x19, 8, 0); // 512 banks
        cart.handle_rom_write(0x2000, 0x34);
        cart.handle_rom_write(0x3000, 0x01);
        assert_eq!(cart.current_rom_bank(), 0x134);
        assert_eq!(cart.read_rom(0x4000), 0x34); // bank byte is low 8 bits of index

        // MBC5 allows mapping bank 0 into the high window.
        cart.handle_rom_write(0x2000, 0x00);
        cart.handle_rom_write(0x3000, 0x00);
        assert_eq!(cart.current_rom_bank(), 0);
        assert_eq!(cart.read_rom(0x4000), 0);
    }

    #[test]
    fn mbc3_rtc_select_and_latch() {
        let mut cart = make_cart(0x10, 2, 0x03);
        cart.handle_rom_write(0x0000, 0x0A);
        // Halt bit set so the wall clock cannot advance the registers
        // between the write and the assertions.
        cart.rtc_registers = [10, 20, 3, 0, 0x40];

        cart.handle_rom_write(0x4000, 0x08); // select seconds register
        cart.handle_rom_write(0x6000, 0x00);
        cart.handle_rom_write(0x6000, 0x01); // latch
        assert_eq!(cart.read_ram(0xA000), 10);

        cart.handle_rom_write(0x4000, 0x09);
        assert_eq!(cart.read_ram(0xA000), 20);

        // Selecting a RAM bank leaves RTC mode.
        cart.handle_rom_write(0x4000, 0x01);
        assert!(!cart.rtc_selected);
        assert_eq!(cart.ram_bank, 1);
    }

    #[test]
    fn battery_round_trip() {
        let dir = std::env::temp_dir().join("dmgboy_cart_test");
        std::fs::create_dir_all(&dir).unwrap();
        let rom_path = dir.join("battery.gb");
        std::fs::write(&rom_path, make_rom(0x03, 1, 0x02)).unwrap();

        let mut cart = Cartridge::new();
        cart.load_cart(rom_path.to_str().unwrap()).unwrap();
        cart.handle_rom_write(0x0000, 0x0A);
        cart.write_ram(0xA000, 0xAB);
        cart.write_ram(0xBFFF, 0xCD);
        cart.save_battery();

        let mut reloaded = Cartridge::new();
        reloaded.load_cart(rom_path.to_str().unwrap()).unwrap();
        reloaded.handle_rom_write(0x0000, 0x0A);
        assert_eq!(reloaded.read_ram(0xA000), 0xAB);
        assert_eq!(reloaded.read_ram(0xBFFF), 0xCD);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn snapshot_round_trip() {
        let mut cart = make_cart(0x03, 2, 0x03);
        cart.handle_rom_write(0x0000, 0x0A);
        cart.handle_rom_write(0x2000, 0x03);
        cart.write_ram(0xA001, 0x42);

        let snap = cart.snapshot_fields();
        let mut other = make_cart(0x03, 2, 0x03);
        other.restore_fields(&snap).unwrap();
        assert_eq!(other.current_rom_bank(), 3);
        assert!(other.ram_enabled);
        assert_eq!(other.read_ram(0xA001), 0x42);
    }
}
