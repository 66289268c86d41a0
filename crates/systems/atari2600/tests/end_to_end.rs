//! End-to-end tests driving `Atari2600System` through small hand-assembled
//! 6507 programs, exercising CPU/TIA/RIOT/cartridge integration the way a
//! real cartridge would.

use emu_core::cpu_6502::flags;
use emu_core::System;
use emu_atari2600::Atari2600System;

/// TIA/RIOT register offsets used by the hand-assembled programs below.
mod reg {
    pub const WSYNC: u8 = 0x02;
    pub const NUSIZ0: u8 = 0x04;
    pub const NUSIZ1: u8 = 0x05;
    pub const COLUPF: u8 = 0x08;
    pub const COLUBK: u8 = 0x09;
    pub const CTRLPF: u8 = 0x0A;
    pub const PF0: u8 = 0x0D;
    pub const PF1: u8 = 0x0E;
    pub const PF2: u8 = 0x0F;
    pub const RESP0: u8 = 0x10;
    pub const RESP1: u8 = 0x11;
    pub const GRP0: u8 = 0x1B;
    pub const GRP1: u8 = 0x1C;
    pub const CXCLR: u8 = 0x2C;
    /// Collision read-side address for CXPPMM (player/player, missile/missile).
    pub const CXPPMM: u16 = 0x0037;
    pub const TIM64T: u16 = 0x0296;
    pub const INTIM: u16 = 0x0284;
    pub const TIMINT: u16 = 0x0285;
}

const NOP: u8 = 0xEA;

/// A tiny builder that assembles 6502 opcodes into a 4 KB cartridge image
/// starting at bus address $1000, with the reset vector pointed at offset 0.
struct Asm {
    code: Vec<u8>,
}

impl Asm {
    fn new() -> Self {
        Self { code: Vec::new() }
    }

    /// Bus address of the next byte this builder will emit.
    fn here(&self) -> u16 {
        0x1000 + self.code.len() as u16
    }

    fn lda_imm(&mut self, val: u8) -> &mut Self {
        self.code.extend_from_slice(&[0xA9, val]);
        self
    }

    fn sta_zp(&mut self, addr: u8) -> &mut Self {
        self.code.extend_from_slice(&[0x85, addr]);
        self
    }

    fn sta_abs(&mut self, addr: u16) -> &mut Self {
        self.code.extend_from_slice(&[0x8D, (addr & 0xFF) as u8, (addr >> 8) as u8]);
        self
    }

    fn lda_abs(&mut self, addr: u16) -> &mut Self {
        self.code.extend_from_slice(&[0xAD, (addr & 0xFF) as u8, (addr >> 8) as u8]);
        self
    }

    fn clc(&mut self) -> &mut Self {
        self.code.push(0x18);
        self
    }

    fn adc_imm(&mut self, val: u8) -> &mut Self {
        self.code.extend_from_slice(&[0x69, val]);
        self
    }

    fn jsr(&mut self, addr: u16) -> &mut Self {
        self.code.extend_from_slice(&[0x20, (addr & 0xFF) as u8, (addr >> 8) as u8]);
        self
    }

    fn rts(&mut self) -> &mut Self {
        self.code.push(0x60);
        self
    }

    fn nop(&mut self) -> &mut Self {
        self.code.push(NOP);
        self
    }

    fn nops(&mut self, n: usize) -> &mut Self {
        self.code.extend(std::iter::repeat(NOP).take(n));
        self
    }

    fn jmp(&mut self, addr: u16) -> &mut Self {
        self.code.extend_from_slice(&[0x4C, (addr & 0xFF) as u8, (addr >> 8) as u8]);
        self
    }

    /// A JMP back to its own address: a self-loop used to park the CPU once
    /// the interesting part of a program has run.
    fn jmp_self(&mut self) -> &mut Self {
        let here = self.here();
        self.jmp(here);
        self
    }

    /// Build a 4 KB `None`-mapper cartridge image with the reset vector
    /// pointed at offset 0 ($1000).
    fn into_rom(self) -> Vec<u8> {
        let mut rom = vec![0u8; 4096];
        rom[..self.code.len()].copy_from_slice(&self.code);
        rom[0x0FFC] = 0x00;
        rom[0x0FFD] = 0x10;
        rom
    }
}

fn mounted(rom: Vec<u8>) -> Atari2600System {
    let mut sys = Atari2600System::new();
    sys.mount("Cartridge", &rom).expect("mount should accept a well-formed ROM");
    sys
}

#[test]
fn lda_immediate_sets_accumulator_and_flags() {
    let mut asm = Asm::new();
    asm.lda_imm(0x42);
    let rom = asm.into_rom();
    let mut sys = mounted(rom);

    let cycles = sys.step_instruction();
    assert_eq!(cycles, 2);

    let regs = sys.cpu_registers().unwrap();
    assert_eq!(regs.a, 0x42);
    assert_eq!(regs.status & flags::ZERO, 0);
    assert_eq!(regs.status & flags::NEGATIVE, 0);
    assert_eq!(regs.pc, 0x1002);
    assert_eq!(regs.cycles, 2);
}

#[test]
fn adc_chain_sets_overflow_carry_and_negative() {
    // 127 + 1 = -128 in two's complement: signed overflow, no unsigned carry.
    let mut asm = Asm::new();
    asm.lda_imm(0x7F).clc().adc_imm(0x01);
    let rom = asm.into_rom();
    let mut sys = mounted(rom);

    for _ in 0..3 {
        sys.step_instruction();
    }

    let regs = sys.cpu_registers().unwrap();
    assert_eq!(regs.a, 0x80);
    assert_ne!(regs.status & flags::NEGATIVE, 0);
    assert_ne!(regs.status & flags::OVERFLOW, 0);
    assert_eq!(regs.status & flags::CARRY, 0);
    assert_eq!(regs.status & flags::ZERO, 0);
}

#[test]
fn jsr_rts_round_trips_program_counter_and_stack() {
    let mut asm = Asm::new();
    let target = asm.here().wrapping_add(6);
    asm.jsr(target);
    let return_addr = asm.here();
    asm.nops(3);
    assert_eq!(asm.here(), target);
    asm.rts();
    let rom = asm.into_rom();
    let mut sys = mounted(rom);

    let initial_sp = sys.cpu_registers().unwrap().sp;
    sys.step_instruction(); // JSR
    sys.step_instruction(); // RTS

    let regs = sys.cpu_registers().unwrap();
    assert_eq!(regs.pc, return_addr);
    assert_eq!(regs.sp, initial_sp);
}

#[test]
fn wsync_strobe_advances_to_the_next_scanline() {
    let mut asm = Asm::new();
    asm.nops(3).sta_zp(reg::WSYNC);
    let rom = asm.into_rom();
    let mut sys = mounted(rom);

    for _ in 0..3 {
        sys.step_instruction();
    }
    assert_eq!(sys.debug_info().unwrap().scanline, 0);

    sys.step_instruction(); // STA WSYNC: busy-advances to the scanline boundary
    assert_eq!(sys.debug_info().unwrap().scanline, 1);
}

#[test]
fn playfield_with_reflect_covers_every_column() {
    let mut asm = Asm::new();
    asm.lda_imm(0x01).sta_zp(reg::CTRLPF) // reflect on
        .lda_imm(0xF0).sta_zp(reg::PF0)
        .lda_imm(0xFF).sta_zp(reg::PF1)
        .sta_zp(reg::PF2) // A is still 0xFF
        .lda_imm(0x1E).sta_zp(reg::COLUPF)
        .lda_imm(0x00).sta_zp(reg::COLUBK)
        .jmp_self();
    let rom = asm.into_rom();
    let mut sys = mounted(rom);

    sys.step_frame().expect("frame should complete within the safety cap");

    let framebuffer = sys.framebuffer().unwrap();
    let row = 5usize;
    let columns = 160usize;
    for col in 0..columns {
        assert_eq!(
            framebuffer[row * columns + col],
            0x1E,
            "column {col} of row {row} should be fully covered by the playfield"
        );
    }
}

#[test]
fn sprite_collision_latches_and_clears_on_cxclr() {
    let mut asm = Asm::new();
    asm.lda_imm(0x07) // quad-width copies on both players
        .sta_zp(reg::NUSIZ0)
        .sta_zp(reg::NUSIZ1)
        .lda_imm(0xFF) // full 8-bit sprite pattern
        .sta_zp(reg::GRP0)
        .sta_zp(reg::GRP1)
        .sta_zp(reg::RESP0)
        .sta_zp(reg::RESP1)
        .nops(40); // more than a full scanline's worth of CPU cycles
    let cxclr_addr = asm.here();
    asm.sta_zp(reg::CXCLR);
    let rom = asm.into_rom();
    let mut sys = mounted(rom);

    // Run the setup instructions (LDA/STA pairs before the NOP padding).
    for _ in 0..8 {
        sys.step_instruction();
    }

    // Step through the NOP padding until the beam has crossed both sprites
    // at least once on some scanline.
    let mut guard = 0;
    while sys.peek(reg::CXPPMM) & 0x80 == 0 {
        sys.step_instruction();
        guard += 1;
        assert!(guard < 100, "player/player collision never latched");
    }
    assert_ne!(sys.peek(reg::CXPPMM) & 0x80, 0);

    // Advance to (but not past) the CXCLR strobe.
    while sys.cpu_registers().unwrap().pc != cxclr_addr {
        sys.step_instruction();
    }
    sys.step_instruction(); // STA CXCLR
    assert_eq!(
        sys.peek(reg::CXPPMM) & 0x80,
        0,
        "collision latch should read 0 immediately after CXCLR"
    );
}

#[test]
fn f8_bankswitch_reads_distinct_bytes_per_bank() {
    // Identical code lives at offset 0 of both 4 KB banks so execution stays
    // coherent across the bank switch; only a data marker differs per bank.
    let mut asm = Asm::new();
    asm.lda_abs(0x1FF8) // switch to bank 0
        .lda_abs(0x1800) // read this bank's marker byte
        .sta_zp(0x80)
        .lda_abs(0x1FF9) // switch to bank 1
        .lda_abs(0x1800)
        .sta_zp(0x81);
    let code = asm.code.clone();

    let mut rom = vec![0u8; 8192];
    rom[..code.len()].copy_from_slice(&code);
    rom[4096..4096 + code.len()].copy_from_slice(&code);
    rom[0x0800] = 0x11; // bank 0 marker
    rom[4096 + 0x0800] = 0x22; // bank 1 marker
    // Reset vector lives in bank 1 (the default active bank on an F8 cart).
    rom[4096 + 0x0FFC] = 0x00;
    rom[4096 + 0x0FFD] = 0x10;

    let mut sys = mounted(rom);
    assert_eq!(sys.debug_info().unwrap().current_bank, 1);

    for _ in 0..6 {
        sys.step_instruction();
    }

    assert_eq!(sys.peek(0x0080), 0x11);
    assert_eq!(sys.peek(0x0081), 0x22);
}

#[test]
fn riot_timer_decrements_on_schedule_and_underflows() {
    let mut asm = Asm::new();
    asm.lda_imm(0x0A).sta_abs(reg::TIM64T).nops(32);
    let pc_after_warmup = asm.here();
    asm.nops(287).sta_zp(0x80);
    let rom = asm.into_rom();
    let mut sys = mounted(rom);

    // LDA #$0A, STA TIM64T
    sys.step_instruction();
    sys.step_instruction();

    // 32 NOPs * 2 cycles = 64 cycles: exactly one 64-clock tick, 10 -> 9.
    for _ in 0..32 {
        sys.step_instruction();
    }
    assert_eq!(sys.cpu_registers().unwrap().pc, pc_after_warmup);
    assert_eq!(sys.peek(reg::INTIM), 9);
    assert_eq!(sys.peek(reg::TIMINT) & 0x80, 0);

    // 287 more NOPs (574 cycles) + one 3-cycle STA zp = 641 cycles since the
    // write: ten 64-cycle ticks bring the timer to 0 with the flag set, and
    // the 641st cycle (interval now 1) wraps it to $FF.
    for _ in 0..287 {
        sys.step_instruction();
    }
    sys.step_instruction();

    assert_eq!(sys.peek(reg::INTIM), 0xFF);
    assert_ne!(sys.peek(reg::TIMINT) & 0x80, 0);
}
