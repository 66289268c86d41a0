//! Atari 2600 system implementation

#![allow(clippy::upper_case_acronyms)]

mod bus;
mod cartridge;
mod cpu;
mod riot;
mod tia;

use bus::Atari2600Bus;
use cartridge::{Cartridge, CartridgeBankState, CartridgeError};
use cpu::Atari2600Cpu;
pub use cpu::CpuRegisters;
use emu_core::cpu_6502::Memory6502;
use emu_core::{types::Frame, MountPointInfo, System};
use serde_json::Value;
use thiserror::Error;

/// Safety cap on how many CPU instructions `step_frame` will execute while
/// waiting for the TIA to report a completed frame. A well-behaved program
/// produces a frame in roughly 19,912 cycles; this is a generous multiple of
/// that so a runaway program can't hang the driver.
const MAX_STEPS_PER_FRAME: u32 = 100_000;

#[derive(Debug, Error)]
pub enum Atari2600Error {
    #[error("Cartridge error: {0}")]
    Cartridge(#[from] CartridgeError),
    #[error("No cartridge loaded")]
    NoCartridge,
    #[error("Invalid mount point: {0}")]
    InvalidMountPoint(String),
}

/// Atari 2600 system
pub struct Atari2600System {
    cpu: Atari2600Cpu,
    cycles: u64,
}

impl Default for Atari2600System {
    fn default() -> Self {
        Self::new()
    }
}

impl Atari2600System {
    /// Create a new Atari 2600 system
    pub fn new() -> Self {
        let bus = Atari2600Bus::new();
        let cpu = Atari2600Cpu::new(bus);
        
        Self {
            cpu,
            cycles: 0,
        }
    }

    /// Get debug information
    pub fn debug_info(&self) -> Option<DebugInfo> {
        self.cpu.bus().and_then(|bus| {
            bus.cartridge.as_ref().map(|cart| {
                let cart = cart.borrow();
                DebugInfo {
                    rom_size: cart.size(),
                    banking_scheme: format!("{:?}", cart.scheme()),
                    current_bank: cart.current_bank(),
                    scanline: bus.tia.get_scanline(),
                }
            })
        })
    }

    /// Raw TIA color codes for the whole 262x160 grid (rows = scanlines),
    /// exactly as the TIA wrote them. No palette mapping is applied.
    pub fn framebuffer(&self) -> Option<&[u8]> {
        self.cpu.bus().map(|bus| bus.tia.framebuffer())
    }

    /// Atomic snapshot write of both joysticks' directional bits.
    pub fn set_swcha(&mut self, byte: u8) {
        if let Some(bus) = self.cpu.bus_mut() {
            bus.riot.set_swcha(byte);
        }
    }

    /// Atomic snapshot write of the console switches (Select/Reset/etc).
    pub fn set_swchb(&mut self, byte: u8) {
        if let Some(bus) = self.cpu.bus_mut() {
            bus.riot.set_swchb(byte);
        }
    }

    /// Set player 0's fire button state.
    pub fn set_trigger0(&mut self, pressed: bool) {
        if let Some(bus) = self.cpu.bus_mut() {
            bus.tia.set_trigger0(pressed);
        }
    }

    /// Set player 1's fire button state.
    pub fn set_trigger1(&mut self, pressed: bool) {
        if let Some(bus) = self.cpu.bus_mut() {
            bus.tia.set_trigger1(pressed);
        }
    }

    /// Snapshot of the 6507 register file, for debug tooling and tests.
    pub fn cpu_registers(&self) -> Option<CpuRegisters> {
        self.cpu.registers()
    }

    /// Read a byte off the bus without advancing any clocks. Uses the same
    /// decode path `step_frame` does, so it observes bank-switch hotspots
    /// exactly like a real CPU read would; intended for debug tooling and
    /// tests, not the hot path.
    pub fn peek(&self, addr: u16) -> u8 {
        self.cpu.bus().map(|bus| bus.read(addr)).unwrap_or(0)
    }

    /// Execute exactly one CPU instruction and clock the rest of the system
    /// by its cycle cost, servicing any WSYNC stall it triggers. Returns the
    /// instruction's cycle count. For debug tooling and tests that need
    /// finer granularity than `step_frame`'s whole-frame loop.
    pub fn step_instruction(&mut self) -> u32 {
        let cycles = self.cpu.step();
        if let Some(bus) = self.cpu.bus_mut() {
            bus.clock(cycles);
            bus.service_wsync();
        }
        self.cycles += cycles as u64;
        cycles
    }
}

#[derive(Debug, Clone)]
pub struct DebugInfo {
    pub rom_size: usize,
    pub banking_scheme: String,
    pub current_bank: usize,
    pub scanline: u16,
}

impl System for Atari2600System {
    type Error = Atari2600Error;

    fn reset(&mut self) {
        self.cpu.reset();
        if let Some(bus) = self.cpu.bus_mut() {
            bus.reset();
        }
        self.cycles = 0;
    }

    fn step_frame(&mut self) -> Result<Frame, Self::Error> {
        let mut steps = 0u32;
        loop {
            let cycles = self.cpu.step();
            let mut frame_done = false;
            if let Some(bus) = self.cpu.bus_mut() {
                bus.clock(cycles);
                bus.service_wsync();
                frame_done = bus.tia.take_frame_complete();
            }
            self.cycles += cycles as u64;
            steps += 1;
            if frame_done || steps >= MAX_STEPS_PER_FRAME {
                break;
            }
        }

        // Widen raw TIA color codes into the frame's u32 pixels. This is not
        // a real NTSC palette lookup (that's left to the frontend); it only
        // satisfies the workspace-wide Frame contract shared by every system.
        let mut frame = Frame::new(
            crate::tia::VISIBLE_COLUMNS as u32,
            crate::tia::SCANLINES_PER_FRAME as u32,
        );
        if let Some(bus) = self.cpu.bus() {
            for (dst, &code) in frame.pixels.iter_mut().zip(bus.tia.framebuffer()) {
                *dst = 0xFF00_0000 | code as u32;
            }
        }

        Ok(frame)
    }

    fn save_state(&self) -> Value {
        // ROM bytes are never embedded; only the bank-selection state is,
        // since a cartridge must already be mounted before a state loads.
        let cartridge_bank: Option<CartridgeBankState> = self
            .cpu
            .bus()
            .and_then(|bus| bus.cartridge.as_ref())
            .map(|cart| cart.borrow().bank_state());

        serde_json::json!({
            "version": 1,
            "system": "atari2600",
            "cycles": self.cycles,
            "bus": self.cpu.bus(),
            "cartridge_bank": cartridge_bank,
        })
    }

    fn load_state(&mut self, v: &Value) -> Result<(), serde_json::Error> {
        let version = v["version"].as_u64().unwrap_or(0);
        if version != 1 {
            return Err(serde_json::from_str::<()>("invalid").unwrap_err());
        }

        let system = v["system"].as_str().unwrap_or("");
        if system != "atari2600" {
            return Err(serde_json::from_str::<()>("invalid").unwrap_err());
        }

        self.cycles = v["cycles"].as_u64().unwrap_or(0);

        if let Some(bus_value) = v.get("bus") {
            let mut bus: Atari2600Bus = serde_json::from_value(bus_value.clone())?;
            // Cartridge data is skipped by serde; carry over whatever is
            // currently mounted, then restore its bank selection.
            if let Some(old_bus) = self.cpu.bus() {
                bus.cartridge = old_bus.cartridge.clone();
            }
            if let Some(cart) = &bus.cartridge {
                if let Some(bank_value) = v.get("cartridge_bank") {
                    if !bank_value.is_null() {
                        let bank: CartridgeBankState = serde_json::from_value(bank_value.clone())?;
                        cart.borrow_mut().restore_bank_state(bank);
                    }
                }
            }
            self.cpu = Atari2600Cpu::new(bus);
        }

        Ok(())
    }

    fn supports_save_states(&self) -> bool {
        true
    }

    fn mount_points(&self) -> Vec<MountPointInfo> {
        vec![MountPointInfo {
            id: "Cartridge".to_string(),
            name: "Cartridge Slot".to_string(),
            extensions: vec!["a26".to_string(), "bin".to_string()],
            required: true,
        }]
    }

    fn mount(&mut self, mount_point_id: &str, data: &[u8]) -> Result<(), Self::Error> {
        if mount_point_id != "Cartridge" {
            return Err(Atari2600Error::InvalidMountPoint(
                mount_point_id.to_string(),
            ));
        }
        
        let cartridge = Cartridge::new(data.to_vec())?;
        
        if let Some(bus) = self.cpu.bus_mut() {
            bus.load_cartridge(cartridge);
        }
        
        self.reset();
        Ok(())
    }

    fn unmount(&mut self, mount_point_id: &str) -> Result<(), Self::Error> {
        if mount_point_id != "Cartridge" {
            return Err(Atari2600Error::InvalidMountPoint(
                mount_point_id.to_string(),
            ));
        }
        
        if let Some(bus) = self.cpu.bus_mut() {
            bus.cartridge = None;
        }
        
        Ok(())
    }

    fn is_mounted(&self, mount_point_id: &str) -> bool {
        if mount_point_id != "Cartridge" {
            return false;
        }
        
        self.cpu
            .bus()
            .map(|bus| bus.cartridge.is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_creation() {
        let sys = Atari2600System::new();
        assert_eq!(sys.cycles, 0);
    }

    #[test]
    fn test_mount_points() {
        let sys = Atari2600System::new();
        let mounts = sys.mount_points();
        
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].id, "Cartridge");
        assert!(mounts[0].required);
    }

    #[test]
    fn test_mount_cartridge() {
        let mut sys = Atari2600System::new();
        
        // Create a simple 4K ROM
        let rom = vec![0xFF; 4096];
        
        assert!(sys.mount("Cartridge", &rom).is_ok());
        assert!(sys.is_mounted("Cartridge"));
    }

    #[test]
    fn test_unmount_cartridge() {
        let mut sys = Atari2600System::new();
        
        let rom = vec![0xFF; 4096];
        sys.mount("Cartridge", &rom).unwrap();
        
        assert!(sys.unmount("Cartridge").is_ok());
        assert!(!sys.is_mounted("Cartridge"));
    }

    #[test]
    fn test_invalid_mount_point() {
        let mut sys = Atari2600System::new();
        let rom = vec![0xFF; 4096];
        
        assert!(sys.mount("Invalid", &rom).is_err());
    }

    #[test]
    fn test_reset() {
        let mut sys = Atari2600System::new();
        
        // Load a ROM and run for a bit
        let rom = vec![0xFF; 4096];
        sys.mount("Cartridge", &rom).unwrap();
        
        // Reset should work
        sys.reset();
        assert_eq!(sys.cycles, 0);
    }

    #[test]
    fn test_save_load_state() {
        let mut sys = Atari2600System::new();
        
        assert!(sys.supports_save_states());
        
        let state = sys.save_state();
        assert_eq!(state["version"], 1);
        assert_eq!(state["system"], "atari2600");
        
        let mut sys2 = Atari2600System::new();
        assert!(sys2.load_state(&state).is_ok());
    }
}
