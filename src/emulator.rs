//! The CHIP-8 machine itself: registers, RAM, stack, framebuffer, timers,
//! and the single-cycle executor.

use std::time::Instant;

use miette::{bail, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::chip8::{
    Instruction, FLAG_REG, FONT_HEIGHT, FONT_SPRITES, INS_LEN, KEY_NONE,
    PROG_START, RAM_SIZE, REG_CNT, SCREEN_HEIGHT, SCREEN_WIDTH, STACK_SIZE,
    TIMER_FREQ,
};
use crate::decoder::DecodedIns;

/// Largest ROM that fits between the program start and the end of RAM.
pub const ROM_MAX: usize = RAM_SIZE - PROG_START as usize;

/// Complete architectural state. The host drives [`Emulator::step`] from
/// its render loop, writes [`Emulator::key`] between steps, and reads the
/// public fields to draw its display.
pub struct Emulator {
    pub pc: u16,
    pub index: u16,
    /// Points at the next free stack slot, wrapping modulo the stack depth.
    pub sp: u8,
    /// Key currently held by the host, or [`KEY_NONE`].
    pub key: u8,
    pub regs: [u8; REG_CNT],
    pub screen: [[bool; SCREEN_WIDTH]; SCREEN_HEIGHT],
    wait_for_key: bool,
    key_reg: usize,
    // Timers count down smoothly in the time domain and are rounded on read.
    dtimer: f64,
    stimer: f64,
    stack: [u16; STACK_SIZE],
    ram: [u8; RAM_SIZE],
    rng: StdRng,
    last_time: Instant,
}

impl Emulator {
    /// Build a machine with the font table at RAM offset 0 and the ROM
    /// image at [`PROG_START`].
    pub fn new(rom: &[u8]) -> Result<Emulator> {
        if rom.len() > ROM_MAX {
            bail!(
                "ROM size is too big: {} bytes, maximum is {} bytes",
                rom.len(),
                ROM_MAX
            );
        }

        let mut ram = [0u8; RAM_SIZE];
        for (i, glyph) in FONT_SPRITES.iter().enumerate() {
            ram[i * glyph.len()..(i + 1) * glyph.len()].copy_from_slice(glyph);
        }
        let prog = PROG_START as usize;
        ram[prog..prog + rom.len()].copy_from_slice(rom);

        Ok(Emulator {
            pc: PROG_START,
            index: 0,
            sp: 0,
            key: KEY_NONE,
            regs: [0; REG_CNT],
            screen: [[false; SCREEN_WIDTH]; SCREEN_HEIGHT],
            wait_for_key: false,
            key_reg: 0,
            dtimer: 0.0,
            stimer: 0.0,
            stack: [0; STACK_SIZE],
            ram,
            rng: StdRng::from_entropy(),
            last_time: Instant::now(),
        })
    }

    /// Restart the timer clock, e.g. after the host was paused, so timers
    /// do not leap on resume.
    pub fn reset_clock(&mut self) {
        self.last_time = Instant::now();
    }

    pub fn delay_timer(&self) -> u8 {
        self.dtimer.round() as u8
    }

    pub fn sound_timer(&self) -> u8 {
        self.stimer.round() as u8
    }

    /// True while the buzzer should sound. The audio host polls this.
    pub fn sound_playing(&self) -> bool {
        self.sound_timer() > 0
    }

    /// Big-endian instruction fetch, wrapping modulo RAM size.
    pub fn fetch_ins(&self, at: u16) -> u16 {
        let at = at as usize;
        (self.ram[at % RAM_SIZE] as u16) << 8 | self.ram[(at + 1) % RAM_SIZE] as u16
    }

    /// Execute one instruction. Timers are decremented by the elapsed wall
    /// time first, so their rate is independent of instruction throughput.
    ///
    /// Returns `false` when an illegal instruction was decoded; the
    /// machine state is left untouched so the host can inspect it.
    pub fn step(&mut self) -> bool {
        let now = Instant::now();
        let dt = now.duration_since(self.last_time).as_secs_f64();
        self.last_time = now;
        self.update_timers(dt);

        // Fx0A latch: hold here until the host reports a key, then store
        // it and carry on with the instruction after the load.
        if self.wait_for_key {
            if self.key == KEY_NONE {
                return true;
            }
            self.pc = self.pc.wrapping_add(INS_LEN);
            self.regs[self.key_reg] = self.key;
            self.wait_for_key = false;
        }

        use Instruction as I;
        let ins = DecodedIns::new(self.fetch_ins(self.pc));
        let vvx = self.regs[ins.vx as usize];
        let vvy = self.regs[ins.vy as usize];

        match ins.kind {
            I::Cls => self.screen = [[false; SCREEN_WIDTH]; SCREEN_HEIGHT],

            I::Ret => {
                self.sp = self.sp.wrapping_sub(1);
                self.pc = self.stack[self.sp as usize % STACK_SIZE];
            }

            // Machine-code calls are ignored.
            I::Sys => {}

            I::Jp => self.pc = ins.addr,

            I::Call => {
                self.stack[self.sp as usize % STACK_SIZE] =
                    self.pc.wrapping_add(INS_LEN);
                self.sp = self.sp.wrapping_add(1);
                self.pc = ins.addr;
            }

            I::SeB => {
                if vvx == ins.byte {
                    self.pc = self.pc.wrapping_add(INS_LEN);
                }
            }

            I::SneB => {
                if vvx != ins.byte {
                    self.pc = self.pc.wrapping_add(INS_LEN);
                }
            }

            I::SeV => {
                if vvx == vvy {
                    self.pc = self.pc.wrapping_add(INS_LEN);
                }
            }

            I::LdB => self.regs[ins.vx as usize] = ins.byte,

            // The carry flag is untouched for the immediate form.
            I::AddB => self.regs[ins.vx as usize] = vvx.wrapping_add(ins.byte),

            I::LdV => self.regs[ins.vx as usize] = vvy,
            I::Or => self.regs[ins.vx as usize] = vvx | vvy,
            I::And => self.regs[ins.vx as usize] = vvx & vvy,
            I::Xor => self.regs[ins.vx as usize] = vvx ^ vvy,

            I::AddV => {
                let (sum, carry) = vvx.overflowing_add(vvy);
                self.regs[FLAG_REG] = carry as u8;
                self.regs[ins.vx as usize] = sum;
            }

            I::Sub => {
                // VF is the no-borrow flag.
                self.regs[FLAG_REG] = (vvx >= vvy) as u8;
                self.regs[ins.vx as usize] = vvx.wrapping_sub(vvy);
            }

            // SHR/SHL operate on Vx alone; Vy is ignored.
            I::Shr => {
                self.regs[FLAG_REG] = vvx & 1;
                self.regs[ins.vx as usize] = vvx >> 1;
            }

            I::Subn => {
                self.regs[FLAG_REG] = (vvy >= vvx) as u8;
                self.regs[ins.vx as usize] = vvy.wrapping_sub(vvx);
            }

            I::Shl => {
                self.regs[FLAG_REG] = (vvx >> 7) & 1;
                self.regs[ins.vx as usize] = vvx << 1;
            }

            I::SneV => {
                if vvx != vvy {
                    self.pc = self.pc.wrapping_add(INS_LEN);
                }
            }

            I::LdI => self.index = ins.addr,

            I::JpV0 => self.pc = (self.regs[0] as u16).wrapping_add(ins.addr),

            I::Rnd => self.regs[ins.vx as usize] = self.rng.gen::<u8>() & ins.byte,

            I::Drw => self.draw_sprite(vvx, vvy, ins.nibble),

            // A missing key never equals Vx, so SKP falls through and
            // SKNP always skips.
            I::Skp => {
                if self.key != KEY_NONE && vvx == self.key {
                    self.pc = self.pc.wrapping_add(INS_LEN);
                }
            }

            I::Sknp => {
                if self.key == KEY_NONE || vvx != self.key {
                    self.pc = self.pc.wrapping_add(INS_LEN);
                }
            }

            I::LdVDt => self.regs[ins.vx as usize] = self.delay_timer(),

            I::LdVKey => {
                self.key_reg = ins.vx as usize;
                self.wait_for_key = true;
            }

            I::LdDtV => self.dtimer = vvx as f64,
            I::LdStV => self.stimer = vvx as f64,

            I::AddI => self.index = self.index.wrapping_add(vvx as u16),

            I::LdFont => self.index = (FONT_HEIGHT * vvx as usize) as u16,

            I::LdBcd => {
                let at = self.index as usize;
                self.ram[at % RAM_SIZE] = vvx / 100;
                self.ram[(at + 1) % RAM_SIZE] = (vvx % 100) / 10;
                self.ram[(at + 2) % RAM_SIZE] = vvx % 10;
            }

            // I itself is left unchanged by the register dump/restore.
            I::StoreRegs => {
                for i in 0..=ins.vx as usize {
                    self.ram[(self.index as usize + i) % RAM_SIZE] = self.regs[i];
                }
            }

            I::LoadRegs => {
                for i in 0..=ins.vx as usize {
                    self.regs[i] = self.ram[(self.index as usize + i) % RAM_SIZE];
                }
            }

            I::Illegal => return false,
        }

        // Branches set PC themselves, and the key-wait load advances PC
        // only once its key arrives. Everything else falls through here.
        match ins.kind {
            I::Ret | I::Jp | I::Call | I::JpV0 | I::LdVKey => {}
            _ => self.pc = self.pc.wrapping_add(INS_LEN),
        }

        true
    }

    /// XOR-blit an `height`-row sprite from RAM at `I` to `(x, y)`, both
    /// axes wrapping. VF reports whether any ON pixel was turned OFF.
    fn draw_sprite(&mut self, x: u8, y: u8, height: u8) {
        let mut collision = false;
        for i in 0..height as usize {
            let row = self.ram[(self.index as usize + i) % RAM_SIZE];
            let yf = (y as usize + i) % SCREEN_HEIGHT;
            for j in 0..8 {
                let xf = (x as usize + j) % SCREEN_WIDTH;
                // MSB to LSB is left to right.
                let img_px = (row >> (7 - j)) & 1 == 1;
                let old_px = self.screen[yf][xf];
                let new_px = old_px ^ img_px;
                if old_px && !new_px {
                    collision = true;
                }
                self.screen[yf][xf] = new_px;
            }
        }
        self.regs[FLAG_REG] = collision as u8;
    }

    fn update_timers(&mut self, dt: f64) {
        self.dtimer = (self.dtimer - dt * TIMER_FREQ as f64).max(0.0);
        self.stimer = (self.stimer - dt * TIMER_FREQ as f64).max(0.0);
    }
}
