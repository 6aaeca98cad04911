//! Terminal front-end for the interpreter: raw-mode handling, the 16-key
//! pad mapping, and the framebuffer/HUD renderer.

use std::io::{self, Stdout, Write};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::{cursor, execute, queue, style::Print, terminal};

use crate::chip8::{KEY_CNT, KEY_NONE, REGISTERS, SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::decoder::DecodedIns;
use crate::emulator::Emulator;

/// Keyboard layout for the hexadecimal keypad, indexed by CHIP-8 key:
///
/// ```text
/// C8 keypad            host keys
/// | 1 | 2 | 3 | C |    | 1 | 2 | 3 | 4 |
/// | 4 | 5 | 6 | D |    | Q | W | E | R |
/// | 7 | 8 | 9 | E |    | A | S | D | F |
/// | A | 0 | B | F |    | Z | X | C | V |
/// ```
pub static KEY_MAP: [char; KEY_CNT] = [
    'x', '1', '2', '3', 'q', 'w', 'e', 'a', 's', 'd', 'z', 'c', '4', 'r',
    'f', 'v',
];

/// A host action decoded from a terminal event.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Control {
    Quit,
    TogglePause,
    Reset,
    SpeedUp,
    SpeedDown,
    /// One of the 16 pad keys was pressed.
    Pad(u8),
}

/// Poll for at most `timeout` and translate the next relevant key event.
pub fn poll_control(timeout: Duration) -> io::Result<Option<Control>> {
    if !event::poll(timeout)? {
        return Ok(None);
    }
    let Event::Key(key) = event::read()? else {
        return Ok(None);
    };
    if key.kind == KeyEventKind::Release {
        return Ok(None);
    }

    let control = match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('c')) => Control::Quit,
        (_, KeyCode::Esc) => Control::Quit,
        (_, KeyCode::Char(' ')) => Control::TogglePause,
        (_, KeyCode::Enter) => Control::Reset,
        (_, KeyCode::Left) => Control::SpeedDown,
        (_, KeyCode::Right) => Control::SpeedUp,
        (_, KeyCode::Char(ch)) => {
            let ch = ch.to_ascii_lowercase();
            match KEY_MAP.iter().position(|&k| k == ch) {
                Some(pad) => Control::Pad(pad as u8),
                None => return Ok(None),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(control))
}

/// Extra state the HUD displays alongside the machine.
pub struct Hud {
    pub instrs_per_frame: u32,
    pub paused: bool,
    pub key: u8,
    pub last_illegal: Option<u16>,
}

/// Owns the terminal while the emulator runs. Raw mode and the alternate
/// screen are restored on drop, so a mid-run error cannot wedge the shell.
pub struct Display {
    out: Stdout,
}

impl Display {
    pub fn enter() -> io::Result<Display> {
        terminal::enable_raw_mode()?;
        let mut out = io::stdout();
        execute!(out, terminal::EnterAlternateScreen, cursor::Hide)?;
        Ok(Display { out })
    }

    /// Repaint the framebuffer and HUD. Pixels are packed two rows per
    /// text line using half-block glyphs.
    pub fn draw(&mut self, emu: &Emulator, hud: &Hud) -> io::Result<()> {
        queue!(self.out, cursor::MoveTo(0, 0))?;

        let border: String = "─".repeat(SCREEN_WIDTH);
        queue!(self.out, Print(format!("┌{border}┐")), cursor::MoveToNextLine(1))?;
        for y in (0..SCREEN_HEIGHT).step_by(2) {
            let mut line = String::with_capacity(SCREEN_WIDTH + 2);
            line.push('│');
            for x in 0..SCREEN_WIDTH {
                let top = emu.screen[y][x];
                let bottom = emu.screen[y + 1][x];
                line.push(match (top, bottom) {
                    (true, true) => '█',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (false, false) => ' ',
                });
            }
            line.push('│');
            queue!(self.out, Print(line), cursor::MoveToNextLine(1))?;
        }
        queue!(self.out, Print(format!("└{border}┘")), cursor::MoveToNextLine(1))?;

        for line in self.hud_lines(emu, hud) {
            queue!(
                self.out,
                terminal::Clear(terminal::ClearType::CurrentLine),
                Print(line),
                cursor::MoveToNextLine(1)
            )?;
        }
        queue!(self.out, terminal::Clear(terminal::ClearType::FromCursorDown))?;
        self.out.flush()
    }

    fn hud_lines(&self, emu: &Emulator, hud: &Hud) -> Vec<String> {
        let mut lines = Vec::with_capacity(8);

        for half in 0..2 {
            let mut line = String::new();
            for reg in (half * 8)..(half * 8 + 8) {
                line.push_str(&format!(
                    "{} {:02X}  ",
                    REGISTERS[reg], emu.regs[reg]
                ));
            }
            lines.push(line);
        }

        lines.push(format!(
            "PC {:04X}  I {:04X}  SP {:02X}  DT {:3}  ST {:3}  KEY {}",
            emu.pc,
            emu.index,
            emu.sp,
            emu.delay_timer(),
            emu.sound_timer(),
            if hud.key == KEY_NONE {
                "--".to_string()
            } else {
                format!("{:X}", hud.key)
            },
        ));

        let state = if hud.paused {
            "paused".to_string()
        } else {
            format!("{} instr/frame", hud.instrs_per_frame)
        };
        let beep = if emu.sound_playing() { "  ♪" } else { "" };
        lines.push(format!(
            "> {}  [{state}]{beep}",
            DecodedIns::new(emu.fetch_ins(emu.pc))
        ));

        if let Some(word) = hud.last_illegal {
            lines.push(format!("illegal instruction {word:#06X}"));
        }

        lines.push(String::new());
        lines.push(
            "keys 1234/qwer/asdf/zxcv  space pause  enter reset  \
             arrows speed  esc quit"
                .to_string(),
        );
        lines
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        let _ = execute!(self.out, terminal::LeaveAlternateScreen, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}
