/*
  hdw/io.rs
  Info: I/O register routing for 0xFF00-0xFF7F and 0xFFFF
  Description: The io module is the proxy layer between the bus and the
              components that own memory-mapped registers. Each recognized
              address is forwarded to its owner; everything unlisted reads
              as 0xFF and swallows writes.

  Register map:
    FF00        Joypad (P1)
    FF01-FF02   Serial data / control (stub)
    FF04-FF07   Timer (DIV, TIMA, TMA, TAC)
    FF0F        Interrupt request flags
    FF10-FF3F   Audio channels, mixer, wave RAM
    FF40-FF4B   LCD / PPU registers (FF46 write schedules OAM DMA)
    FF50        Boot ROM disable (write 1, monotonic)
    FFFF        Interrupt enable mask
*/

use log::debug;

use crate::hdw::bus::Bus;

pub fn io_read(bus: &Bus, address: u16) -> u8 {
    match address {
        0xFF00 => bus.gamepad.p1_output(),
        0xFF01 | 0xFF02 => bus.serial.read(address),
        0xFF04..=0xFF07 => bus.timer.timer_read(address),
        0xFF0F => bus.interrupt_controller.get_int_flags(),
        0xFF10..=0xFF3F => bus.apu.read_register(address),
        0xFF40..=0xFF4B => bus.ppu.lcd.lcd_read(address),
        0xFFFF => bus.interrupt_controller.get_ie_register(),
        _ => 0xFF,
    }
}

pub fn io_write(bus: &mut Bus, address: u16, value: u8) {
    match address {
        0xFF00 => bus.gamepad.set_selection(value),
        0xFF01 | 0xFF02 => bus.serial.write(address, value),
        0xFF04..=0xFF07 => bus.timer.timer_write(address, value),
        0xFF0F => bus.interrupt_controller.set_int_flags(value),
        0xFF10..=0xFF3F => bus.apu.write_register(address, value),
        0xFF40..=0xFF4B => {
            // A DMA register write comes back as the source page.
            if let Some(source_page) = bus.ppu.lcd.lcd_write(address, value) {
                bus.dma.start(source_page);
            }
        }
        0xFF50 => {
            if value & 0x01 != 0 {
                bus.disable_boot_rom();
            }
        }
        0xFFFF => bus.interrupt_controller.set_ie_register(value),
        _ => {
            debug!("unhandled I/O write {:#04X} -> {:#06X}", value, address);
        }
    }
}
