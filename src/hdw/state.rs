/*
  hdw/state.rs
  Info: Versioned machine snapshots
  Description: The state module serializes the whole machine to a byte stream
              and restores it. The format is little endian and self-describing:

                magic "DMGS" (4 bytes)
                version (u16)
                sections, each: 4-byte tag, u32 payload length, payload

              Sections in order: CPU, MEM, MBC, PPU, TIM, AUD, INT. Every
              section stores its component's concrete fields in declaration
              order. A load first validates the magic, the version, and every
              section tag and length against what this machine would produce;
              nothing is applied until the whole file has been checked, so a
              refused load leaves the running state untouched.
*/

use std::fmt;
use std::io::{self, Read, Write};

use crate::hdw::cpu::Cpu;

pub const STATE_MAGIC: [u8; 4] = *b"DMGS";
pub const STATE_VERSION: u16 = 1;

const SECTION_TAGS: [&[u8; 4]; 7] = [b"CPU ", b"MEM ", b"MBC ", b"PPU ", b"TIM ", b"AUD ", b"INT "];

#[derive(Debug)]
pub enum StateError {
    Io(io::Error),
    BadMagic,
    VersionMismatch { found: u16 },
    BadSection(String),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::Io(e) => write!(f, "snapshot I/O error: {}", e),
            StateError::BadMagic => write!(f, "not a snapshot file"),
            StateError::VersionMismatch { found } => {
                write!(f, "snapshot version {} does not match {}", found, STATE_VERSION)
            }
            StateError::BadSection(msg) => write!(f, "malformed snapshot section: {}", msg),
        }
    }
}

impl From<io::Error> for StateError {
    fn from(e: io::Error) -> Self {
        StateError::Io(e)
    }
}

pub fn save_state<W: Write>(cpu: &Cpu, writer: &mut W) -> io::Result<()> {
    writer.write_all(&STATE_MAGIC)?;
    writer.write_all(&STATE_VERSION.to_le_bytes())?;

    let sections = collect_sections(cpu);
    for (tag, payload) in SECTION_TAGS.iter().zip(sections.iter()) {
        writer.write_all(*tag)?;
        writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        writer.write_all(payload)?;
    }
    Ok(())
}

pub fn load_state<R: Read>(cpu: &mut Cpu, reader: &mut R) -> Result<(), StateError> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;

    if data.len() < 6 || data[0..4] != STATE_MAGIC {
        return Err(StateError::BadMagic);
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != STATE_VERSION {
        return Err(StateError::VersionMismatch { found: version });
    }

    // Structure pass: every tag present in order, every length as this
    // machine lays it out. Nothing mutates until this pass is clean.
    let expected_lengths: Vec<usize> = collect_sections(cpu).iter().map(|s| s.len()).collect();
    let mut payloads: Vec<&[u8]> = Vec::with_capacity(SECTION_TAGS.len());
    let mut pos = 6;
    for (tag, expected_length) in SECTION_TAGS.iter().zip(expected_lengths.iter()) {
        if pos + 8 > data.len() {
            return Err(StateError::BadSection("truncated header".into()));
        }
        if &data[pos..pos + 4] != *tag {
            return Err(StateError::BadSection(format!(
                "expected section {:?}",
                String::from_utf8_lossy(*tag)
            )));
        }
        let length =
            u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
                as usize;
        if length != *expected_length {
            return Err(StateError::BadSection(format!(
                "section {:?} length {} != {}",
                String::from_utf8_lossy(*tag),
                length,
                expected_length
            )));
        }
        pos += 8;
        if pos + length > data.len() {
            return Err(StateError::BadSection("truncated payload".into()));
        }
        payloads.push(&data[pos..pos + length]);
        pos += length;
    }
    if pos != data.len() {
        return Err(StateError::BadSection("trailing bytes".into()));
    }

    apply_sections(cpu, &payloads).map_err(StateError::BadSection)
}

fn collect_sections(cpu: &Cpu) -> Vec<Vec<u8>> {
    vec![
        cpu_fields(cpu),
        mem_fields(cpu),
        cpu.bus.cart.snapshot_fields(),
        cpu.bus.ppu.snapshot_fields(),
        tim_fields(cpu),
        cpu.bus.apu.snapshot_fields(),
        int_fields(cpu),
    ]
}

fn apply_sections(cpu: &mut Cpu, payloads: &[&[u8]]) -> Result<(), String> {
    restore_cpu_fields(cpu, payloads[0])?;
    restore_mem_fields(cpu, payloads[1])?;
    cpu.bus.cart.restore_fields(payloads[2])?;
    cpu.bus.ppu.restore_fields(payloads[3])?;
    restore_tim_fields(cpu, payloads[4])?;
    cpu.bus.apu.restore_fields(payloads[5])?;
    restore_int_fields(cpu, payloads[6])?;
    Ok(())
}

fn cpu_fields(cpu: &Cpu) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.push(cpu.registers.a);
    out.push(cpu.registers.f.as_byte());
    out.push(cpu.registers.b);
    out.push(cpu.registers.c);
    out.push(cpu.registers.d);
    out.push(cpu.registers.e);
    out.push(cpu.registers.h);
    out.push(cpu.registers.l);
    out.extend_from_slice(&cpu.pc.to_le_bytes());
    out.extend_from_slice(&cpu.sp.to_le_bytes());
    out.push(cpu.is_halted as u8);
    out.push(cpu.is_stopped as u8);
    out.push(cpu.fatal as u8);
    out
}

fn restore_cpu_fields(cpu: &mut Cpu, data: &[u8]) -> Result<(), String> {
    let mut r = FieldReader::new(data);
    cpu.registers.a = r.u8()?;
    cpu.registers.f = r.u8()?.into();
    cpu.registers.b = r.u8()?;
    cpu.registers.c = r.u8()?;
    cpu.registers.d = r.u8()?;
    cpu.registers.e = r.u8()?;
    cpu.registers.h = r.u8()?;
    cpu.registers.l = r.u8()?;
    cpu.pc = r.u16()?;
    cpu.sp = r.u16()?;
    cpu.is_halted = r.u8()? != 0;
    cpu.is_stopped = r.u8()? != 0;
    cpu.fatal = r.u8()? != 0;
    r.finish()
}

fn mem_fields(cpu: &Cpu) -> Vec<u8> {
    let mut out = Vec::with_capacity(0x2000 + 0x7F + 4);
    out.extend_from_slice(cpu.bus.ram.wram_bytes());
    out.extend_from_slice(cpu.bus.ram.hram_bytes());
    out.push(cpu.bus.boot_active as u8);
    out.push(cpu.bus.dma.active as u8);
    out.push(cpu.bus.dma.source_page);
    out.push(cpu.bus.dma.offset);
    out
}

fn restore_mem_fields(cpu: &mut Cpu, data: &[u8]) -> Result<(), String> {
    let mut r = FieldReader::new(data);
    let wram = r.bytes(0x2000)?.to_vec();
    let hram = r.bytes(0x7F)?.to_vec();
    cpu.bus.ram.restore(&wram, &hram);
    // Boot overlay disable is monotonic: a snapshot can never re-arm it.
    let snapshot_boot = r.u8()? != 0;
    if !snapshot_boot {
        cpu.bus.boot_active = false;
    }
    cpu.bus.dma.active = r.u8()? != 0;
    cpu.bus.dma.source_page = r.u8()?;
    cpu.bus.dma.offset = r.u8()?;
    r.finish()
}

fn tim_fields(cpu: &Cpu) -> Vec<u8> {
    let timer = &cpu.bus.timer;
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&timer.counter.to_le_bytes());
    out.push(timer.tima);
    out.push(timer.tma);
    out.push(timer.tac);
    out.push(timer.overflow_pending as u8);
    out
}

fn restore_tim_fields(cpu: &mut Cpu, data: &[u8]) -> Result<(), String> {
    let mut r = FieldReader::new(data);
    cpu.bus.timer.counter = r.u16()?;
    cpu.bus.timer.tima = r.u8()?;
    cpu.bus.timer.tma = r.u8()?;
    cpu.bus.timer.tac = r.u8()?;
    cpu.bus.timer.overflow_pending = r.u8()? != 0;
    r.finish()
}

fn int_fields(cpu: &Cpu) -> Vec<u8> {
    let ic = &cpu.bus.interrupt_controller;
    vec![
        ic.ie_register,
        ic.int_flags,
        ic.master_enabled as u8,
        ic.enabling_ime as u8,
    ]
}

fn restore_int_fields(cpu: &mut Cpu, data: &[u8]) -> Result<(), String> {
    let mut r = FieldReader::new(data);
    cpu.bus.interrupt_controller.ie_register = r.u8()?;
    cpu.bus.interrupt_controller.int_flags = r.u8()? & 0x1F;
    cpu.bus.interrupt_controller.master_enabled = r.u8()? != 0;
    cpu.bus.interrupt_controller.enabling_ime = r.u8()? != 0;
    r.finish()
}

// Little cursor over a section payload, shared by the per-component
// restore functions.
pub struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        FieldReader { data, pos: 0 }
    }

    pub fn u8(&mut self) -> Result<u8, String> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, String> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, String> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, String> {
        let b = self.bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], String> {
        if self.pos + len > self.data.len() {
            return Err("section payload truncated".into());
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn finish(&self) -> Result<(), String> {
        if self.pos == self.data.len() {
            Ok(())
        } else {
            Err("section payload has trailing bytes".into())
        }
    }
}
