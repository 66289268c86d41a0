//! TIA (Television Interface Adapter) - video and audio chip for the Atari 2600.
//!
//! The TIA has no framebuffer of its own on real hardware: it drives the
//! electron beam directly, one color clock at a time, and whatever the
//! programmer has set up in its registers at that instant is what gets
//! painted. This emulation clocks the same way - `clock()` advances exactly
//! one color clock and, if the beam is in the visible window, resolves and
//! stores one pixel - but accumulates the result into an owned framebuffer
//! rather than driving a CRT.
//!
//! Color values stored here are raw NTSC color-code bytes (the value written
//! to COLUP0/COLUP1/COLUPF/COLUBK), not RGB. Turning a color code into a
//! displayable pixel is a palette lookup left to the frontend.

use serde::{Deserialize, Serialize};

use emu_core::log;
use emu_core::logging::{LogCategory, LogLevel};

/// Color clocks of horizontal blanking at the start of every scanline.
const HBLANK: u16 = 68;
/// Color clocks per scanline (68 HBLANK + 160 visible).
const SCANLINE_CLOCKS: u16 = 228;
/// Visible columns per scanline.
pub const VISIBLE_COLUMNS: usize = 160;
/// Scanlines per frame (3 VSYNC + 37 VBLANK + 192 visible + 30 overscan, NTSC).
pub const SCANLINES_PER_FRAME: usize = 262;
/// Consecutive scanlines of asserted VSYNC needed before a falling edge forces
/// a frame restart - real hardware requires this to reject a single glitched
/// VSYNC pulse.
const VSYNC_LINES_FOR_RESYNC: u32 = 3;

/// A resolved sprite copy: a missile/player copy's starting column plus its
/// horizontal scale (1/2/4 color clocks per graphics bit).
#[derive(Debug, Clone, Copy)]
struct SpriteCopies {
    offsets: [u16; 3],
    count: usize,
    scale: u16,
}

fn nusiz_copies(nusiz: u8) -> SpriteCopies {
    match nusiz & 0x07 {
        0 => SpriteCopies { offsets: [0, 0, 0], count: 1, scale: 1 },
        1 => SpriteCopies { offsets: [0, 16, 0], count: 2, scale: 1 },
        2 => SpriteCopies { offsets: [0, 32, 0], count: 2, scale: 1 },
        3 => SpriteCopies { offsets: [0, 16, 32], count: 3, scale: 1 },
        4 => SpriteCopies { offsets: [0, 64, 0], count: 2, scale: 1 },
        5 => SpriteCopies { offsets: [0, 0, 0], count: 1, scale: 2 },
        6 => SpriteCopies { offsets: [0, 32, 64], count: 3, scale: 1 },
        7 => SpriteCopies { offsets: [0, 0, 0], count: 1, scale: 4 },
        _ => unreachable!(),
    }
}

fn missile_width(nusiz: u8) -> u16 {
    1u16 << ((nusiz >> 4) & 0x03)
}

fn ball_width(ctrlpf: u8) -> u16 {
    1u16 << ((ctrlpf >> 4) & 0x03)
}

/// Index into the eight collision latch registers, matching the real TIA's
/// CXM0P/CXM1P/CXP0FB/CXP1FB/CXM0FB/CXM1FB/CXBLPF/CXPPMM layout.
mod cx {
    pub const M0P: usize = 0;
    pub const M1P: usize = 1;
    pub const P0FB: usize = 2;
    pub const P1FB: usize = 3;
    pub const M0FB: usize = 4;
    pub const M1FB: usize = 5;
    pub const BLPF: usize = 6;
    pub const PPMM: usize = 7;
}

/// TIA chip state: write-side registers, beam position, object positions,
/// collision latches, and the accumulated frame buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tia {
    // --- sync/blank ---
    vsync_active: bool,
    vblank_active: bool,
    input_latch_enabled: bool,
    vsync_line_count: u32,

    // --- playfield ---
    pf0: u8,
    pf1: u8,
    pf2: u8,
    playfield_reflect: bool,
    playfield_score_mode: bool,
    playfield_priority: bool,
    ctrlpf_raw: u8,

    // --- colors (raw NTSC color codes) ---
    colubk: u8,
    colupf: u8,
    colup0: u8,
    colup1: u8,

    // --- player 0 / 1 ---
    grp0: u8,
    grp1: u8,
    nusiz0: u8,
    nusiz1: u8,
    refp0: bool,
    refp1: bool,
    player0_x: u8,
    player1_x: u8,

    // --- missiles ---
    enam0: bool,
    enam1: bool,
    missile0_x: u8,
    missile1_x: u8,
    resmp0: bool,
    resmp1: bool,

    // --- ball ---
    enabl: bool,
    ball_x: u8,

    // --- horizontal motion (raw bytes; high nibble is the signed delta) ---
    hmp0: u8,
    hmp1: u8,
    hmm0: u8,
    hmm1: u8,
    hmbl: u8,
    hmove_pending: Option<[i16; 5]>,

    // --- collisions ---
    collisions: [u8; 8],

    // --- beam position ---
    tia_cycle: u16,
    scanline: u16,
    wsync_active: bool,
    frame_complete: bool,

    // --- inputs ---
    trigger0_pressed: bool,
    trigger1_pressed: bool,
    trigger0_latched: bool,
    trigger1_latched: bool,

    // --- audio (inert storage; no sound synthesis) ---
    audc0: u8,
    audc1: u8,
    audf0: u8,
    audf1: u8,
    audv0: u8,
    audv1: u8,

    // --- output ---
    #[serde(skip, default = "default_framebuffer")]
    framebuffer: Vec<u8>,
}

fn default_framebuffer() -> Vec<u8> {
    vec![0; VISIBLE_COLUMNS * SCANLINES_PER_FRAME]
}

impl Default for Tia {
    fn default() -> Self {
        Self::new()
    }
}

impl Tia {
    pub fn new() -> Self {
        Self {
            vsync_active: false,
            vblank_active: false,
            input_latch_enabled: false,
            vsync_line_count: 0,
            pf0: 0,
            pf1: 0,
            pf2: 0,
            playfield_reflect: false,
            playfield_score_mode: false,
            playfield_priority: false,
            ctrlpf_raw: 0,
            colubk: 0,
            colupf: 0,
            colup0: 0,
            colup1: 0,
            grp0: 0,
            grp1: 0,
            nusiz0: 0,
            nusiz1: 0,
            refp0: false,
            refp1: false,
            player0_x: 0,
            player1_x: 0,
            enam0: false,
            enam1: false,
            missile0_x: 0,
            missile1_x: 0,
            resmp0: false,
            resmp1: false,
            enabl: false,
            ball_x: 0,
            hmp0: 0,
            hmp1: 0,
            hmm0: 0,
            hmm1: 0,
            hmbl: 0,
            hmove_pending: None,
            collisions: [0; 8],
            tia_cycle: 0,
            scanline: 0,
            wsync_active: false,
            frame_complete: false,
            trigger0_pressed: false,
            trigger1_pressed: false,
            trigger0_latched: false,
            trigger1_latched: false,
            audc0: 0,
            audc1: 0,
            audf0: 0,
            audf1: 0,
            audv0: 0,
            audv1: 0,
            framebuffer: default_framebuffer(),
        }
    }

    pub fn reset(&mut self) {
        let trigger0_pressed = self.trigger0_pressed;
        let trigger1_pressed = self.trigger1_pressed;
        *self = Self::new();
        self.trigger0_pressed = trigger0_pressed;
        self.trigger1_pressed = trigger1_pressed;
    }

    /// Position latched by a RESPx/RESMx/RESBL strobe: the beam's current
    /// column (relative to the start of HBLANK) plus the TIA's fixed 8
    /// color-clock analog pipeline delay, wrapped into the 160-column
    /// visible window.
    fn latch_position(&self) -> u8 {
        let raw = self.tia_cycle as i32 - HBLANK as i32 + 8;
        (raw.rem_euclid(VISIBLE_COLUMNS as i32)) as u8
    }

    /// Write to a TIA register (address already masked to the low 6 bits
    /// used by the write-side decode).
    pub fn write(&mut self, addr: u8, val: u8) {
        match addr & 0x3F {
            0x00 => {
                let new_vsync = (val & 0x02) != 0;
                if new_vsync && !self.vsync_active {
                    self.vsync_line_count = 0;
                }
                if !new_vsync && self.vsync_active && self.vsync_line_count >= VSYNC_LINES_FOR_RESYNC {
                    log!(LogCategory::PPU, LogLevel::Debug, "VSYNC forced frame restart");
                    self.scanline = 0;
                    self.frame_complete = true;
                }
                self.vsync_active = new_vsync;
            }
            0x01 => {
                self.vblank_active = (val & 0x02) != 0;
                let new_latch = (val & 0x40) != 0;
                if !new_latch {
                    self.trigger0_latched = false;
                    self.trigger1_latched = false;
                }
                self.input_latch_enabled = new_latch;
            }
            0x02 => self.wsync_active = true,
            0x03 => {} // RSYNC: not exposed by this implementation
            0x04 => self.nusiz0 = val,
            0x05 => self.nusiz1 = val,
            0x06 => self.colup0 = val,
            0x07 => self.colup1 = val,
            0x08 => self.colupf = val,
            0x09 => self.colubk = val,
            0x0A => {
                self.ctrlpf_raw = val;
                self.playfield_reflect = (val & 0x01) != 0;
                self.playfield_score_mode = (val & 0x02) != 0;
                self.playfield_priority = (val & 0x04) != 0;
            }
            0x0B => self.refp0 = (val & 0x08) != 0,
            0x0C => self.refp1 = (val & 0x08) != 0,
            0x0D => self.pf0 = val,
            0x0E => self.pf1 = val,
            0x0F => self.pf2 = val,
            0x10 => self.player0_x = self.latch_position(),
            0x11 => self.player1_x = self.latch_position(),
            0x12 => self.missile0_x = self.latch_position(),
            0x13 => self.missile1_x = self.latch_position(),
            0x14 => self.ball_x = self.latch_position(),
            0x15 => self.audc0 = val & 0x0F,
            0x16 => self.audc1 = val & 0x0F,
            0x17 => self.audf0 = val & 0x1F,
            0x18 => self.audf1 = val & 0x1F,
            0x19 => self.audv0 = val & 0x0F,
            0x1A => self.audv1 = val & 0x0F,
            0x1B => self.grp0 = val,
            0x1C => self.grp1 = val,
            0x1D => self.enam0 = (val & 0x02) != 0,
            0x1E => self.enam1 = (val & 0x02) != 0,
            0x1F => self.enabl = (val & 0x02) != 0,
            0x20 => self.hmp0 = val,
            0x21 => self.hmp1 = val,
            0x22 => self.hmm0 = val,
            0x23 => self.hmm1 = val,
            0x24 => self.hmbl = val,
            0x28 => {
                self.resmp0 = (val & 0x02) != 0;
                if self.resmp0 {
                    self.missile0_x = self.player0_x;
                }
            }
            0x29 => {
                self.resmp1 = (val & 0x02) != 0;
                if self.resmp1 {
                    self.missile1_x = self.player1_x;
                }
            }
            0x2A => {
                // HMOVE: sample the five motion registers now, apply at the
                // start of the next scanline.
                self.hmove_pending = Some([
                    decode_motion(self.hmp0),
                    decode_motion(self.hmp1),
                    decode_motion(self.hmm0),
                    decode_motion(self.hmm1),
                    decode_motion(self.hmbl),
                ]);
            }
            0x2B => {
                self.hmp0 = 0;
                self.hmp1 = 0;
                self.hmm0 = 0;
                self.hmm1 = 0;
                self.hmbl = 0;
            }
            0x2C => self.collisions = [0; 8],
            _ => {}
        }
    }

    /// Read from a TIA read-side register: collision latches (addr 0-7) and
    /// input ports (addr 8-13). Mirrored every 16 addresses.
    pub fn read(&self, addr: u8) -> u8 {
        match addr & 0x0F {
            0x00..=0x07 => self.collisions[(addr & 0x07) as usize],
            0x0C => self.read_trigger(0),
            0x0D => self.read_trigger(1),
            0x08..=0x0B => 0x80, // paddle inputs: no paddle hardware, read high
            _ => 0,
        }
    }

    fn read_trigger(&self, which: u8) -> u8 {
        let pressed = if self.input_latch_enabled {
            if which == 0 {
                self.trigger0_latched
            } else {
                self.trigger1_latched
            }
        } else if which == 0 {
            self.trigger0_pressed
        } else {
            self.trigger1_pressed
        };
        if pressed {
            0x00
        } else {
            0x80
        }
    }

    pub fn set_trigger0(&mut self, pressed: bool) {
        self.trigger0_pressed = pressed;
        if pressed && self.input_latch_enabled {
            self.trigger0_latched = true;
        }
    }

    pub fn set_trigger1(&mut self, pressed: bool) {
        self.trigger1_pressed = pressed;
        if pressed && self.input_latch_enabled {
            self.trigger1_latched = true;
        }
    }

    pub fn in_vblank(&self) -> bool {
        self.vblank_active || self.vsync_active
    }

    pub fn get_scanline(&self) -> u16 {
        self.scanline
    }

    pub fn wsync_active(&self) -> bool {
        self.wsync_active
    }

    /// Consume the frame-complete flag set by a natural 261->0 scanline
    /// wraparound or an early VSYNC-forced restart.
    pub fn take_frame_complete(&mut self) -> bool {
        std::mem::replace(&mut self.frame_complete, false)
    }

    /// Raw NTSC color code at (row, col); row in 0..262, col in 0..160.
    pub fn pixel(&self, row: usize, col: usize) -> u8 {
        self.framebuffer[row * VISIBLE_COLUMNS + col]
    }

    pub fn framebuffer(&self) -> &[u8] {
        &self.framebuffer
    }

    /// Advance the TIA by one color clock: resolve and store one pixel (if
    /// in the visible window), then advance the beam.
    pub fn clock(&mut self) {
        if self.tia_cycle >= HBLANK {
            let x = (self.tia_cycle - HBLANK) as usize;
            let color = self.resolve_pixel(x);
            self.framebuffer[self.scanline as usize * VISIBLE_COLUMNS + x] = color;
        }

        self.tia_cycle += 1;
        if self.tia_cycle >= SCANLINE_CLOCKS {
            self.tia_cycle = 0;
            self.wsync_active = false;

            if let Some(deltas) = self.hmove_pending.take() {
                self.apply_hmove(deltas);
            }

            if self.vsync_active {
                self.vsync_line_count += 1;
            }

            self.scanline += 1;
            if self.scanline as usize >= SCANLINES_PER_FRAME {
                self.scanline = 0;
                self.frame_complete = true;
            }
        }

        if self.resmp0 {
            self.missile0_x = self.player0_x;
        }
        if self.resmp1 {
            self.missile1_x = self.player1_x;
        }
    }

    fn apply_hmove(&mut self, deltas: [i16; 5]) {
        let wrap = |x: u8, d: i16| -> u8 {
            (((x as i16 + d).rem_euclid(VISIBLE_COLUMNS as i16)) as u8) % VISIBLE_COLUMNS as u8
        };
        self.player0_x = wrap(self.player0_x, deltas[0]);
        self.player1_x = wrap(self.player1_x, deltas[1]);
        self.missile0_x = wrap(self.missile0_x, deltas[2]);
        self.missile1_x = wrap(self.missile1_x, deltas[3]);
        self.ball_x = wrap(self.ball_x, deltas[4]);
    }

    fn playfield_on(&self, x: usize) -> bool {
        if x < 80 {
            self.get_playfield_bit(x / 4)
        } else {
            let bit_pos = (x - 80) / 4;
            if self.playfield_reflect {
                self.get_playfield_bit(19 - bit_pos)
            } else {
                self.get_playfield_bit(bit_pos)
            }
        }
    }

    fn get_playfield_bit(&self, bit: usize) -> bool {
        match bit {
            0..=3 => (self.pf0 & (0x10 << bit)) != 0,
            4..=11 => (self.pf1 & (0x80 >> (bit - 4))) != 0,
            12..=19 => (self.pf2 & (0x01 << (bit - 12))) != 0,
            _ => false,
        }
    }

    fn player_on(grp: u8, reflect: bool, nusiz: u8, p_x: u8, x: usize) -> bool {
        let copies = nusiz_copies(nusiz);
        let width = 8 * copies.scale;
        for i in 0..copies.count {
            let start = (p_x as u16).wrapping_add(copies.offsets[i]) % VISIBLE_COLUMNS as u16;
            let rel = (x as i32 - start as i32).rem_euclid(VISIBLE_COLUMNS as i32) as u16;
            if rel < width {
                let bit_index = (rel / copies.scale) as u8;
                let bit = if reflect { bit_index } else { 7 - bit_index };
                if (grp & (1 << bit)) != 0 {
                    return true;
                }
            }
        }
        false
    }

    fn missile_on(enabled: bool, nusiz: u8, m_x: u8, x: usize) -> bool {
        if !enabled {
            return false;
        }
        let copies = nusiz_copies(nusiz);
        let width = missile_width(nusiz);
        for i in 0..copies.count {
            let start = (m_x as u16).wrapping_add(copies.offsets[i]) % VISIBLE_COLUMNS as u16;
            let rel = (x as i32 - start as i32).rem_euclid(VISIBLE_COLUMNS as i32) as u16;
            if rel < width {
                return true;
            }
        }
        false
    }

    fn ball_on(&self, x: usize) -> bool {
        if !self.enabl {
            return false;
        }
        let width = ball_width(self.ctrlpf_raw);
        let start = self.ball_x as u16;
        let rel = (x as i32 - start as i32).rem_euclid(VISIBLE_COLUMNS as i32) as u16;
        rel < width
    }

    fn resolve_pixel(&mut self, x: usize) -> u8 {
        if self.vsync_active || self.vblank_active {
            return 0;
        }

        let pf = self.playfield_on(x);
        let bl = self.ball_on(x);
        let p0 = Self::player_on(self.grp0, self.refp0, self.nusiz0, self.player0_x, x);
        let p1 = Self::player_on(self.grp1, self.refp1, self.nusiz1, self.player1_x, x);
        let m0 = Self::missile_on(self.enam0, self.nusiz0, self.missile0_x, x);
        let m1 = Self::missile_on(self.enam1, self.nusiz1, self.missile1_x, x);

        self.latch_collisions(p0, p1, m0, m1, bl, pf);

        let playfield_color = if self.playfield_score_mode {
            if x < 80 {
                self.colup0
            } else {
                self.colup1
            }
        } else {
            self.colupf
        };

        if self.playfield_priority {
            if pf || bl {
                playfield_color
            } else if p0 || m0 {
                self.colup0
            } else if p1 || m1 {
                self.colup1
            } else {
                self.colubk
            }
        } else if p0 || m0 {
            self.colup0
        } else if p1 || m1 {
            self.colup1
        } else if pf || bl {
            playfield_color
        } else {
            self.colubk
        }
    }

    /// OR sticky collision bits into the eight latch registers. Bits persist
    /// until CXCLR; a pair can only ever set, never clear, a bit here.
    fn latch_collisions(&mut self, p0: bool, p1: bool, m0: bool, m1: bool, bl: bool, pf: bool) {
        if m0 && p1 {
            self.collisions[cx::M0P] |= 0x80;
        }
        if m0 && p0 {
            self.collisions[cx::M0P] |= 0x40;
        }
        if m1 && p0 {
            self.collisions[cx::M1P] |= 0x80;
        }
        if m1 && p1 {
            self.collisions[cx::M1P] |= 0x40;
        }
        if p0 && pf {
            self.collisions[cx::P0FB] |= 0x80;
        }
        if p0 && bl {
            self.collisions[cx::P0FB] |= 0x40;
        }
        if p1 && pf {
            self.collisions[cx::P1FB] |= 0x80;
        }
        if p1 && bl {
            self.collisions[cx::P1FB] |= 0x40;
        }
        if m0 && pf {
            self.collisions[cx::M0FB] |= 0x80;
        }
        if m0 && bl {
            self.collisions[cx::M0FB] |= 0x40;
        }
        if m1 && pf {
            self.collisions[cx::M1FB] |= 0x80;
        }
        if m1 && bl {
            self.collisions[cx::M1FB] |= 0x40;
        }
        if bl && pf {
            self.collisions[cx::BLPF] |= 0x80;
        }
        if p0 && p1 {
            self.collisions[cx::PPMM] |= 0x80;
        }
        if m0 && m1 {
            self.collisions[cx::PPMM] |= 0x40;
        }
    }
}

/// Decode a TIA horizontal-motion register's high nibble as the signed
/// -8..+7 delta it represents, then negate it: the TIA's motion convention
/// is reversed from the naive reading (a positive nibble moves the object
/// left on screen).
fn decode_motion(reg: u8) -> i16 {
    let nibble = (reg >> 4) & 0x0F;
    let signed = (nibble as i8) << 4 >> 4; // sign-extend 4 bits to i8
    -(signed as i16)
}
