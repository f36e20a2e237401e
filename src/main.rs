mod hdw;

use log::{error, info, LevelFilter};
use std::fs::File;
use std::process::ExitCode;

use hdw::bus::BOOT_ROM_SIZE;
use hdw::cart::Cartridge;
use hdw::emu::{spawn_engine, EmuContext, EmuControl};
use hdw::state::StateError;
use hdw::ui::Ui;

// Exit codes: 0 clean, 1 file-open failure, 2 state-load version mismatch.
const EXIT_FILE_ERROR: u8 = 1;
const EXIT_STATE_VERSION: u8 = 2;

struct Args {
    rom_path: String,
    boot_rom_path: Option<String>,
    load_state_path: Option<String>,
    debug: bool,
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {} [-d] [-b boot_rom] [-s state_file] rom_file\n  \
         -d   debug logging\n  \
         -b   run the 256-byte boot ROM before the cartridge\n  \
         -s   restore a state snapshot at startup",
        program
    )
}

fn parse_args() -> Result<Args, String> {
    let argv: Vec<String> = std::env::args().collect();
    let mut args = Args {
        rom_path: String::new(),
        boot_rom_path: None,
        load_state_path: None,
        debug: false,
    };

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "-d" => args.debug = true,
            "-b" => {
                i += 1;
                args.boot_rom_path = Some(
                    argv.get(i)
                        .ok_or_else(|| usage(&argv[0]))?
                        .clone(),
                );
            }
            "-s" => {
                i += 1;
                args.load_state_path = Some(
                    argv.get(i)
                        .ok_or_else(|| usage(&argv[0]))?
                        .clone(),
                );
            }
            path => args.rom_path = path.to_string(),
        }
        i += 1;
    }

    if args.rom_path.is_empty() {
        return Err(usage(&argv[0]));
    }
    Ok(args)
}

fn load_boot_rom(path: &str) -> Result<[u8; BOOT_ROM_SIZE], String> {
    let data = std::fs::read(path).map_err(|e| format!("Failed to open {}: {}", path, e))?;
    if data.len() != BOOT_ROM_SIZE {
        return Err(format!(
            "Boot ROM {} is {} bytes, expected {}",
            path,
            data.len(),
            BOOT_ROM_SIZE
        ));
    }
    let mut boot = [0u8; BOOT_ROM_SIZE];
    boot.copy_from_slice(&data);
    Ok(boot)
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::from(EXIT_FILE_ERROR);
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(if args.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init();

    let mut cart = Cartridge::new();
    if let Err(e) = cart.load_cart(&args.rom_path) {
        error!("{}", e);
        return ExitCode::from(EXIT_FILE_ERROR);
    }

    let boot_rom = match &args.boot_rom_path {
        Some(path) => match load_boot_rom(path) {
            Ok(boot) => Some(boot),
            Err(e) => {
                error!("{}", e);
                return ExitCode::from(EXIT_FILE_ERROR);
            }
        },
        None => None,
    };

    let control = EmuControl::new();
    let snapshot_path = format!("{}.state", args.rom_path);
    let mut ctx = EmuContext::new(cart, boot_rom, control.clone(), snapshot_path);

    // Optional snapshot restore before the engine starts.
    if let Some(path) = &args.load_state_path {
        let result = File::open(path)
            .map_err(StateError::Io)
            .and_then(|mut f| ctx.load_state_from(&mut f));
        match result {
            Ok(()) => info!("restored state from {}", path),
            Err(StateError::VersionMismatch { found }) => {
                error!("state file {} has version {}, refusing", path, found);
                return ExitCode::from(EXIT_STATE_VERSION);
            }
            Err(e) => {
                error!("could not restore {}: {}", path, e);
                return ExitCode::from(EXIT_FILE_ERROR);
            }
        }
    }

    let mut ui = match Ui::new() {
        Ok(ui) => ui,
        Err(e) => {
            error!("failed to initialize host window: {}", e);
            return ExitCode::from(EXIT_FILE_ERROR);
        }
    };

    let engine = spawn_engine(ctx);

    if let Err(e) = ui.run(control.clone()) {
        error!("host loop error: {}", e);
    }

    // Cooperative shutdown: the engine finishes its instruction, writes
    // battery RAM and exits.
    control.request_shutdown();
    if engine.join().is_err() {
        error!("engine thread panicked");
    }

    ExitCode::SUCCESS
}
