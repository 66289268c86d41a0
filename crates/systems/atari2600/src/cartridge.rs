//! Atari 2600 cartridge handling and the F8 bank-switch mapper.
//!
//! Atari 2600 cartridges are the simplest kind of mapper: there is no chip on
//! the cartridge besides ROM, and "bank switching" is a side effect of the
//! 6507 touching specific addresses in the cartridge window, regardless of
//! whether that touch is a read or a write. Two schemes are supported here:
//! a flat `None` mapper for images that fit the 4 KB window directly, and
//! `F8`, which toggles between two 4 KB banks on accesses to $1FF8/$1FF9.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use emu_core::log;
use emu_core::logging::{LogCategory, LogLevel};

const BANK_SIZE: usize = 4096;
const MAX_ROM_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("empty ROM image")]
    Empty,
    #[error("unsupported ROM size: {0} bytes (expected <= 4096 or exactly 8192)")]
    InvalidSize(usize),
}

/// Banking scheme. Just the two that matter in practice: a flat image
/// and the common 8 KB F8 two-bank mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankingScheme {
    /// Images of 4 KB or smaller, mirrored to fill the $1000-$1FFF window.
    None,
    /// 8 KB, two 4 KB banks selected by touching $1FF8 / $1FF9.
    F8,
}

/// Atari 2600 cartridge: immutable ROM bytes plus mutable bank-select state.
#[derive(Debug, Clone)]
pub struct Cartridge {
    rom: Vec<u8>,
    scheme: BankingScheme,
    active_bank: usize,
}

/// The part of cartridge state worth carrying across a save state: never the
/// ROM bytes themselves, only which bank was selected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CartridgeBankState {
    pub scheme: BankingScheme,
    pub active_bank: usize,
}

impl Cartridge {
    /// Load a cartridge image, auto-detecting the mapper from its size.
    ///
    /// Images over 8 KB are truncated with a warning; images of 4 KB or
    /// under are mirrored to fill the cartridge window; exactly 8 KB is
    /// assumed to be the F8 two-bank mapper, starting on bank 1 (where the
    /// reset vector conventionally lives).
    pub fn new(mut data: Vec<u8>) -> Result<Self, CartridgeError> {
        if data.is_empty() {
            return Err(CartridgeError::Empty);
        }

        if data.len() > MAX_ROM_SIZE {
            log!(
                LogCategory::Cartridge,
                LogLevel::Warn,
                "ROM image of {} bytes exceeds {} byte limit; truncating",
                data.len(),
                MAX_ROM_SIZE
            );
            data.truncate(MAX_ROM_SIZE);
        }

        let (scheme, active_bank, rom) = if data.len() == MAX_ROM_SIZE {
            (BankingScheme::F8, 1, data)
        } else if data.len() <= BANK_SIZE {
            let mut rom = Vec::with_capacity(BANK_SIZE);
            while rom.len() < BANK_SIZE {
                let remaining = BANK_SIZE - rom.len();
                rom.extend_from_slice(&data[..remaining.min(data.len())]);
            }
            (BankingScheme::None, 0, rom)
        } else {
            return Err(CartridgeError::InvalidSize(data.len()));
        };

        log!(
            LogCategory::Cartridge,
            LogLevel::Info,
            "loaded cartridge: {} byte ROM, scheme={:?}, starting bank={}",
            rom.len(),
            scheme,
            active_bank
        );

        Ok(Self {
            rom,
            scheme,
            active_bank,
        })
    }

    /// Any bus touch at $1FF8/$1FF9 switches the F8 bank, whether the access
    /// is a read or a write, because the bank latch is wired to the address
    /// lines, not the data or R/W lines.
    fn maybe_switch_bank(&mut self, addr: u16) {
        if self.scheme != BankingScheme::F8 {
            return;
        }
        match addr {
            0x1FF8 => {
                if self.active_bank != 0 {
                    log!(LogCategory::Cartridge, LogLevel::Debug, "F8 bank switch -> 0");
                }
                self.active_bank = 0;
            }
            0x1FF9 => {
                if self.active_bank != 1 {
                    log!(LogCategory::Cartridge, LogLevel::Debug, "F8 bank switch -> 1");
                }
                self.active_bank = 1;
            }
            _ => {}
        }
    }

    /// Read a byte from the cartridge window. Takes `&mut self`: a read can
    /// trigger a bank switch just as a write can, since the hotspot latch is
    /// driven by the address bus regardless of R/W.
    pub fn read(&mut self, addr: u16) -> u8 {
        self.maybe_switch_bank(addr);
        let offset = (addr & 0x0FFF) as usize;
        match self.scheme {
            BankingScheme::None => self.rom[offset % self.rom.len()],
            BankingScheme::F8 => self.rom[self.active_bank * BANK_SIZE + offset],
        }
    }

    /// Writes to cartridge space never store data (it's ROM); they can still
    /// trigger a bank switch.
    pub fn write(&mut self, addr: u16) {
        self.maybe_switch_bank(addr);
    }

    pub fn scheme(&self) -> BankingScheme {
        self.scheme
    }

    pub fn current_bank(&self) -> usize {
        self.active_bank
    }

    pub fn size(&self) -> usize {
        self.rom.len()
    }

    pub fn bank_state(&self) -> CartridgeBankState {
        CartridgeBankState {
            scheme: self.scheme,
            active_bank: self.active_bank,
        }
    }

    /// Restore bank-select state from a save state. Only valid against a
    /// cartridge using the same mapper; mismatches are ignored.
    pub fn restore_bank_state(&mut self, state: CartridgeBankState) {
        if state.scheme == self.scheme {
            self.active_bank = state.active_bank;
        }
    }
}
