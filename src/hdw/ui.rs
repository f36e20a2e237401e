// SDL2 host layer: window and scaled framebuffer blit, audio queue, and the
// keyboard-to-joypad mapping. Runs on the main thread and talks to the
// engine thread only through the EmuControl block.

use log::{info, warn};
use sdl2::audio::{AudioQueue, AudioSpecDesired};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::WindowCanvas;
use sdl2::EventPump;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::hdw::emu::EmuControl;
use crate::hdw::gamepad::{BTN_A, BTN_B, BTN_DOWN, BTN_LEFT, BTN_RIGHT, BTN_SELECT, BTN_START, BTN_UP};
use crate::hdw::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};

const SCALE: u32 = 4;
const AUDIO_SAMPLE_RATE: i32 = 44100;

// DMG frame rate: 4194304 / 70224.
const FRAME_TIME: Duration = Duration::from_nanos(16_742_706);

pub struct Ui {
    _sdl_context: sdl2::Sdl,
    canvas: WindowCanvas,
    event_pump: EventPump,
    audio_queue: Option<AudioQueue<f32>>,
    buttons: u8,
    // Scratch buffer for the ARGB-word to texture-byte conversion, reused
    // across frames.
    pixel_bytes: Vec<u8>,
}

impl Ui {
    pub fn new() -> Result<Self, String> {
        let sdl_context = sdl2::init()?;
        let video = sdl_context.video()?;
        let event_pump = sdl_context.event_pump()?;

        let window = video
            .window(
                "dmgboy",
                SCREEN_WIDTH as u32 * SCALE,
                SCREEN_HEIGHT as u32 * SCALE,
            )
            .position_centered()
            .build()
            .map_err(|e| e.to_string())?;

        let canvas = window
            .into_canvas()
            .present_vsync()
            .build()
            .map_err(|e| e.to_string())?;

        let audio_queue = match sdl_context.audio().and_then(|audio| {
            let spec = AudioSpecDesired {
                freq: Some(AUDIO_SAMPLE_RATE),
                channels: Some(2),
                samples: Some(1024),
            };
            audio.open_queue::<f32, _>(None, &spec)
        }) {
            Ok(queue) => {
                queue.resume();
                Some(queue)
            }
            Err(e) => {
                warn!("audio unavailable: {}", e);
                None
            }
        };

        Ok(Ui {
            _sdl_context: sdl_context,
            canvas,
            event_pump,
            audio_queue,
            buttons: 0,
            pixel_bytes: Vec::with_capacity(SCREEN_WIDTH * SCREEN_HEIGHT * 4),
        })
    }

    // Host loop: pump input into the engine, pull frames and audio out.
    // Returns when the user quits.
    pub fn run(&mut self, control: Arc<EmuControl>) -> Result<(), String> {
        let texture_creator = self.canvas.texture_creator();
        let mut texture = texture_creator
            .create_texture_streaming(
                PixelFormatEnum::ARGB8888,
                SCREEN_WIDTH as u32,
                SCREEN_HEIGHT as u32,
            )
            .map_err(|e| e.to_string())?;

        let mut shown_frame = 0u64;
        let mut next_frame = Instant::now();

        'host: loop {
            for event in self.event_pump.poll_iter() {
                match event {
                    Event::Quit { .. }
                    | Event::KeyDown {
                        keycode: Some(Keycode::Escape),
                        ..
                    } => break 'host,

                    Event::KeyDown {
                        keycode: Some(key), ..
                    } => match key {
                        Keycode::P => {
                            if control.paused.load(Ordering::Acquire) {
                                control.resume();
                                info!("resumed");
                            } else {
                                control.pause();
                                info!("paused");
                            }
                        }
                        Keycode::N => control.request_step(),
                        Keycode::F5 => control.save_request.store(true, Ordering::Release),
                        Keycode::F7 => control.load_request.store(true, Ordering::Release),
                        _ => {
                            if let Some(bit) = button_bit(key) {
                                self.buttons |= bit;
                                control.set_buttons(self.buttons);
                            }
                        }
                    },

                    Event::KeyUp {
                        keycode: Some(key), ..
                    } => {
                        if let Some(bit) = button_bit(key) {
                            self.buttons &= !bit;
                            control.set_buttons(self.buttons);
                        }
                    }

                    _ => {}
                }
            }

            // New frame from the engine: blit it.
            let engine_frame = control.frame_count.load(Ordering::Acquire);
            if engine_frame != shown_frame {
                shown_frame = engine_frame;
                if let Ok(frame) = control.frame.lock() {
                    self.pixel_bytes.clear();
                    for pixel in frame.iter() {
                        self.pixel_bytes.extend_from_slice(&pixel.to_le_bytes());
                    }
                }
                texture
                    .update(
                        None,
                        &self.pixel_bytes,
                        SCREEN_WIDTH * std::mem::size_of::<u32>(),
                    )
                    .map_err(|e| e.to_string())?;
                self.canvas.clear();
                self.canvas.copy(&texture, None, None)?;
                self.canvas.present();
            }

            self.drain_audio(&control);

            // Host-side pacing backpressures the free-running engine.
            let now = Instant::now();
            if now < next_frame {
                std::thread::sleep(next_frame - now);
            }
            next_frame += FRAME_TIME;
        }

        Ok(())
    }

    fn drain_audio(&mut self, control: &EmuControl) {
        let Some(queue) = &self.audio_queue else {
            return;
        };
        if let Ok(mut audio) = control.audio.lock() {
            if !audio.is_empty() {
                let samples: Vec<f32> = audio.iter().map(|&s| s as f32 / 128.0).collect();
                audio.clear();
                let _ = queue.queue_audio(&samples);
            }
        }
    }
}

fn button_bit(key: Keycode) -> Option<u8> {
    match key {
        Keycode::Up => Some(BTN_UP),
        Keycode::Down => Some(BTN_DOWN),
        Keycode::Left => Some(BTN_LEFT),
        Keycode::Right => Some(BTN_RIGHT),
        Keycode::X => Some(BTN_A),
        Keycode::Z => Some(BTN_B),
        Keycode::Return => Some(BTN_START),
        Keycode::Tab | Keycode::Backspace => Some(BTN_SELECT),
        _ => None,
    }
}
