use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use miette::IntoDiagnostic;

use crisp8::chip8::KEY_NONE;
use crisp8::term::{self, Control, Display, Hud};
use crisp8::Emulator;

/// Run a CHIP-8 ROM in the terminal.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// ROM image, loaded at 0x200
    rom: PathBuf,

    /// Instructions executed per rendered frame
    #[arg(short, long, default_value_t = 5)]
    speed: u32,
}

/// Render at ~60 fps; the machine's timers run off the wall clock either way.
const FRAME: Duration = Duration::from_micros(16_667);

/// Terminals report no key-up events, so a pressed pad key stays down for
/// a short hold window and is then released.
const KEY_HOLD: Duration = Duration::from_millis(200);

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{report:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> miette::Result<()> {
    let rom = fs::read(&args.rom).into_diagnostic()?;
    let mut emu = Emulator::new(&rom)?;

    let mut display = Display::enter().into_diagnostic()?;
    let mut hud = Hud {
        instrs_per_frame: args.speed.max(1),
        paused: false,
        key: KEY_NONE,
        last_illegal: None,
    };
    let mut key_expires = Instant::now();

    loop {
        let frame_end = Instant::now() + FRAME;

        // Drain input for the rest of the frame budget.
        loop {
            let left = frame_end.saturating_duration_since(Instant::now());
            match term::poll_control(left).into_diagnostic()? {
                Some(Control::Quit) => return Ok(()),
                Some(Control::TogglePause) => hud.paused = !hud.paused,
                Some(Control::Reset) => {
                    emu = Emulator::new(&rom)?;
                    hud.last_illegal = None;
                }
                Some(Control::SpeedUp) if !hud.paused => hud.instrs_per_frame += 1,
                Some(Control::SpeedDown) if !hud.paused => {
                    hud.instrs_per_frame = hud.instrs_per_frame.saturating_sub(1).max(1)
                }
                Some(Control::Pad(key)) => {
                    hud.key = key;
                    key_expires = Instant::now() + KEY_HOLD;
                }
                _ => {}
            }
            if left.is_zero() {
                break;
            }
        }

        if hud.key != KEY_NONE && Instant::now() >= key_expires {
            hud.key = KEY_NONE;
        }

        if hud.paused {
            // Freeze the timers too.
            emu.reset_clock();
        } else {
            for _ in 0..hud.instrs_per_frame {
                emu.key = hud.key;
                if !emu.step() {
                    // Log and keep going; the machine sits on the bad word.
                    hud.last_illegal = Some(emu.fetch_ins(emu.pc));
                }
            }
        }

        display.draw(&emu, &hud).into_diagnostic()?;
    }
}
