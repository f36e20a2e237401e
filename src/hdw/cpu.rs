/*
  hdw/cpu.rs
  Info: CPU core - step loop, interrupt dispatch, HALT/STOP handling
  Description: The cpu module drives instruction execution. Each step runs at
              most one instruction (or one interrupt dispatch) and reports the
              master clocks consumed, always a multiple of four; the engine
              forwards that count to every time-driven subsystem.

  Cpu Struct Members:
    registers: Register file (A/F/B/C/D/E/H/L)
    pc: Program counter
    sp: Stack pointer
    bus: The guest address space and all peripherals
    is_halted: HALT latch - cleared when any enabled interrupt is requested
    is_stopped: STOP latch - cleared by a button press
    fatal: Illegal-opcode latch; execution refuses to continue and the
           engine parks itself so a debugger can inspect state

  Step order:
    1. A halted CPU with any IE&IF bit set resumes (without dispatching).
    2. A pending EI promotes to IME; dispatch waits one more instruction.
    3. With IME set and an interrupt pending: push PC, jump to the vector,
       clear the IF bit and IME, charge 20 clocks.
    4. Otherwise fetch, decode and execute one instruction.
*/

use log::error;

use crate::hdw::bus::Bus;
use crate::hdw::instructions;
use crate::hdw::interrupts::Interrupts;
use crate::hdw::registers::Registers;
use crate::hdw::stack::stack_push16;

pub struct Cpu {
    pub registers: Registers,
    pub pc: u16,
    pub sp: u16,
    pub bus: Bus,
    pub is_halted: bool,
    pub is_stopped: bool,
    pub fatal: bool,
}

impl Cpu {
    pub fn new(bus: Bus) -> Self {
        let boot = bus.boot_active;
        Cpu {
            registers: if boot {
                Registers::new_zeroed()
            } else {
                Registers::new_post_boot()
            },
            pc: if boot { 0x0000 } else { 0x0100 },
            sp: if boot { 0x0000 } else { 0xFFFE },
            bus,
            is_halted: false,
            is_stopped: false,
            fatal: false,
        }
    }

    // Execute one instruction or interrupt dispatch; returns clocks consumed.
    pub fn step(&mut self) -> u32 {
        if self.fatal {
            return 4;
        }

        if self.is_stopped {
            // STOP idles until a button press; the engine clears the latch.
            return 4;
        }

        if self.is_halted {
            if self.bus.interrupt_controller.any_pending() {
                self.is_halted = false;
            } else {
                return 4;
            }
        }

        // EI lands one instruction late: when the latch promotes this step,
        // run the following instruction before dispatching.
        let ime_just_enabled = self.bus.interrupt_controller.step_ime();

        if !ime_just_enabled && self.bus.interrupt_controller.is_master_enabled() {
            if let Some(interrupt) = self.bus.interrupt_controller.pending() {
                self.dispatch_interrupt(interrupt);
                return 20;
            }
        }

        let opcode = self.fetch_byte();
        instructions::execute(self, opcode)
    }

    fn dispatch_interrupt(&mut self, interrupt: Interrupts) {
        let return_pc = self.pc;
        stack_push16(self, return_pc);
        self.pc = interrupt.vector();
        self.bus.interrupt_controller.clear_interrupt(interrupt);
        self.bus.interrupt_controller.set_master_enabled(false);
        self.is_halted = false;
    }

    pub fn fetch_byte(&mut self) -> u8 {
        let value = self.bus.read_byte(self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    pub fn fetch_word(&mut self) -> u16 {
        let low = self.fetch_byte() as u16;
        let high = self.fetch_byte() as u16;
        high << 8 | low
    }

    // Illegal opcodes are fatal: latch the state and leave everything in
    // place for inspection.
    pub fn fatal_opcode(&mut self, opcode: u8) {
        error!(
            "illegal opcode {:#04X} at {:#06X}; halting execution",
            opcode,
            self.pc.wrapping_sub(1)
        );
        self.fatal = true;
    }
}
