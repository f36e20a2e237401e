/*
  hdw/emu.rs
  Info: Emulation engine and host hand-off points
  Description: The emu module owns the CPU (and through it the whole machine)
              and runs the core loop on a dedicated worker thread: step the
              CPU, forward the consumed clocks to the timer, PPU, audio and
              DMA, then service host requests at the instruction boundary.

              All traffic between the host thread and the engine crosses the
              EmuControl block: small atomic fields the engine inspects
              between instructions (buttons, pause/step/shutdown, snapshot
              requests) and two mutex-guarded buffers the engine fills and
              the host drains (the completed frame, the audio batch queue).
              Pause and shutdown are cooperative and take effect at the next
              instruction boundary.

  EmuControl Struct Members:
    running: Engine loop is alive
    paused: Execution suspended (entered on request or on a fatal opcode)
    die: Shutdown request; the loop exits and battery RAM is written
    step_once: Single-step request, honored while paused
    fatal: Runtime-fatal latch the host may poll between frames
    buttons: Host button mask (gamepad bit layout)
    save_request / load_request: Snapshot requests serviced by the engine
    frame_count: Completed frames, for host pacing
    frame: Host-owned copy of the last completed 160x144 ARGB frame
    audio: Bounded queue of interleaved stereo sample batches
*/

use log::{debug, error, info};
use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::hdw::bus::{Bus, BOOT_ROM_SIZE};
use crate::hdw::cart::Cartridge;
use crate::hdw::cpu::Cpu;
use crate::hdw::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::hdw::serial;
use crate::hdw::state;

// Upper bound on buffered audio bytes before overruns are dropped.
const AUDIO_QUEUE_LIMIT: usize = 16384;

pub struct EmuControl {
    pub running: AtomicBool,
    pub paused: AtomicBool,
    pub die: AtomicBool,
    pub step_once: AtomicBool,
    pub fatal: AtomicBool,
    pub buttons: AtomicU8,
    pub save_request: AtomicBool,
    pub load_request: AtomicBool,
    pub frame_count: AtomicU64,
    pub frame: Mutex<Vec<u32>>,
    pub audio: Mutex<Vec<i8>>,
}

impl EmuControl {
    pub fn new() -> Arc<Self> {
        Arc::new(EmuControl {
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            die: AtomicBool::new(false),
            step_once: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
            buttons: AtomicU8::new(0),
            save_request: AtomicBool::new(false),
            load_request: AtomicBool::new(false),
            frame_count: AtomicU64::new(0),
            frame: Mutex::new(vec![0; SCREEN_WIDTH * SCREEN_HEIGHT]),
            audio: Mutex::new(Vec::with_capacity(AUDIO_QUEUE_LIMIT)),
        })
    }

    // Host-side controls.

    pub fn set_buttons(&self, mask: u8) {
        self.buttons.store(mask, Ordering::Release);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn request_step(&self) {
        self.step_once.store(true, Ordering::Release);
    }

    pub fn request_shutdown(&self) {
        self.die.store(true, Ordering::Release);
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }
}

pub struct EmuContext {
    pub cpu: Cpu,
    pub control: Arc<EmuControl>,
    boot_rom: Option<[u8; BOOT_ROM_SIZE]>,
    snapshot_path: String,
}

impl EmuContext {
    pub fn new(
        cart: Cartridge,
        boot_rom: Option<[u8; BOOT_ROM_SIZE]>,
        control: Arc<EmuControl>,
        snapshot_path: String,
    ) -> Self {
        EmuContext {
            cpu: Cpu::new(Bus::new(cart, boot_rom)),
            control,
            boot_rom,
            snapshot_path,
        }
    }

    // Core loop; runs until a shutdown request. Battery RAM is written on
    // the way out.
    pub fn run(&mut self) {
        self.control.running.store(true, Ordering::Release);

        while !self.control.die.load(Ordering::Acquire) {
            self.apply_buttons();
            self.handle_snapshot_requests();

            if self.control.paused.load(Ordering::Acquire) {
                if self.control.step_once.swap(false, Ordering::AcqRel) {
                    self.step_instruction();
                } else {
                    thread::sleep(Duration::from_millis(2));
                }
                continue;
            }

            self.step_instruction();
        }

        self.cpu.bus.cart.save_battery();
        self.control.running.store(false, Ordering::Release);
        info!("engine stopped after {} frames", self.control.frame_count.load(Ordering::Relaxed));
    }

    // One CPU step plus the clock fan-out to every time-driven subsystem.
    pub fn step_instruction(&mut self) {
        let clocks = self.cpu.step();
        self.cpu.bus.tick(clocks);

        if self.cpu.fatal && !self.control.fatal.load(Ordering::Acquire) {
            // Errors never unwind out of a step: park the engine so a
            // debugger can look around.
            self.control.fatal.store(true, Ordering::Release);
            self.control.paused.store(true, Ordering::Release);
        }

        if self.cpu.bus.ppu.frame_ready {
            self.deliver_frame();
            serial::flush_capture();
        }

        if let Some(batch) = self.cpu.bus.apu.take_batch() {
            self.queue_audio(batch);
        }
    }

    // Value-copy the finished frame into the host buffer, then signal.
    fn deliver_frame(&mut self) {
        self.cpu.bus.ppu.frame_ready = false;
        if let Ok(mut frame) = self.control.frame.lock() {
            frame.copy_from_slice(&self.cpu.bus.ppu.framebuffer);
        }
        self.control.frame_count.fetch_add(1, Ordering::AcqRel);
    }

    fn queue_audio(&mut self, batch: Vec<i8>) {
        if let Ok(mut audio) = self.control.audio.lock() {
            if audio.len() + batch.len() <= AUDIO_QUEUE_LIMIT {
                audio.extend_from_slice(&batch);
            } else {
                debug!("audio queue overrun, dropping {} bytes", batch.len());
            }
        }
    }

    // Push the host button mask into the joypad. A fresh press raises the
    // joypad interrupt and wakes STOP.
    fn apply_buttons(&mut self) {
        let mask = self.control.buttons.load(Ordering::Acquire);
        let pressed = self
            .cpu
            .bus
            .gamepad
            .set_buttons(mask, &mut self.cpu.bus.interrupt_controller);
        if pressed && self.cpu.is_stopped {
            self.cpu.is_stopped = false;
        }
    }

    fn handle_snapshot_requests(&mut self) {
        if self.control.save_request.swap(false, Ordering::AcqRel) {
            match File::create(&self.snapshot_path)
                .map_err(state::StateError::Io)
                .and_then(|mut f| state::save_state(&self.cpu, &mut f).map_err(state::StateError::Io))
            {
                Ok(()) => info!("state saved to {}", self.snapshot_path),
                Err(e) => error!("state save failed: {}", e),
            }
        }

        if self.control.load_request.swap(false, Ordering::AcqRel) {
            match File::open(&self.snapshot_path)
                .map_err(state::StateError::Io)
                .and_then(|mut f| state::load_state(&mut self.cpu, &mut f))
            {
                Ok(()) => {
                    info!("state loaded from {}", self.snapshot_path);
                    self.cpu.fatal = false;
                    self.control.fatal.store(false, Ordering::Release);
                }
                Err(e) => error!("state load refused: {}", e),
            }
        }
    }

    // Power-cycle everything except the cartridge ROM and battery RAM.
    pub fn reset(&mut self) {
        let cart = std::mem::replace(&mut self.cpu.bus.cart, Cartridge::new());
        self.cpu = Cpu::new(Bus::new(cart, self.boot_rom));
        self.control.fatal.store(false, Ordering::Release);
        info!("machine reset");
    }

    pub fn save_state_to<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        state::save_state(&self.cpu, writer)
    }

    pub fn load_state_from<R: std::io::Read>(
        &mut self,
        reader: &mut R,
    ) -> Result<(), state::StateError> {
        state::load_state(&mut self.cpu, reader)
    }
}

// Start the engine on its worker thread.
pub fn spawn_engine(mut ctx: EmuContext) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("dmg-engine".into())
        .spawn(move || ctx.run())
        .expect("failed to spawn engine thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdw::cart::ROM_BANK_SIZE;
    use crate::hdw::gamepad::BTN_START;

    fn make_ctx(code: &[u8]) -> EmuContext {
        let mut rom = vec![0u8; 2 * ROM_BANK_SIZE];
        rom[0x0100..0x0100 + code.len()].copy_from_slice(code);
        let mut cart = Cartridge::new();
        cart.load_bytes(rom).unwrap();
        EmuContext::new(cart, None, EmuControl::new(), "/tmp/dmgboy-test.state".into())
    }

    #[test]
    fn step_forwards_clocks_to_subsystems() {
        let mut ctx = make_ctx(&[0x00, 0x00]); // NOPs
        let counter_before = ctx.cpu.bus.timer.counter;
        ctx.step_instruction();
        assert_eq!(ctx.cpu.bus.timer.counter, counter_before.wrapping_add(4));
    }

    #[test]
    fn frame_is_delivered_after_a_frame_of_clocks() {
        // JR -2: a 12-clock infinite loop.
        let mut ctx = make_ctx(&[0x18, 0xFE]);
        let frames_before = ctx.control.frame_count.load(Ordering::Acquire);

        // 70224 clocks per frame at 12 clocks per step.
        for _ in 0..(70224 / 12 + 2) {
            ctx.step_instruction();
        }
        assert!(ctx.control.frame_count.load(Ordering::Acquire) > frames_before);
    }

    #[test]
    fn fatal_opcode_parks_the_engine() {
        let mut ctx = make_ctx(&[0xD3]);
        ctx.step_instruction();
        assert!(ctx.control.is_fatal());
        assert!(ctx.control.paused.load(Ordering::Acquire));
    }

    #[test]
    fn button_press_wakes_stop() {
        let mut ctx = make_ctx(&[0x10, 0x00, 0x00]); // STOP
        ctx.step_instruction();
        assert!(ctx.cpu.is_stopped);

        ctx.control.set_buttons(BTN_START);
        ctx.apply_buttons();
        assert!(!ctx.cpu.is_stopped);
    }

    #[test]
    fn reset_restores_power_on_state() {
        let mut ctx = make_ctx(&[0x3E, 0x42]); // LD A,0x42
        ctx.step_instruction();
        assert_eq!(ctx.cpu.registers.a, 0x42);

        ctx.reset();
        assert_eq!(ctx.cpu.pc, 0x0100);
        assert_eq!(ctx.cpu.registers.get_af(), 0x01B0);
        // The cartridge ROM survived the reset.
        assert_eq!(ctx.cpu.bus.read_byte(0x0100), 0x3E);
    }

    #[test]
    fn snapshot_round_trip_through_engine() {
        let mut ctx = make_ctx(&[0x3E, 0x42, 0x00]);
        ctx.step_instruction();

        let mut snapshot = Vec::new();
        ctx.save_state_to(&mut snapshot).unwrap();

        ctx.step_instruction();
        ctx.cpu.registers.a = 0;

        ctx.load_state_from(&mut snapshot.as_slice()).unwrap();
        assert_eq!(ctx.cpu.registers.a, 0x42);
        assert_eq!(ctx.cpu.pc, 0x0102);
    }
}
