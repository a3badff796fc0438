//! Mapper 34 (BNROM / NINA-001).
//!
//! Two incompatible boards share this id. BNROM switches 32 KiB PRG via
//! writes to `$8000-$FFFF` and uses CHR RAM; NINA-001 ships CHR ROM and
//! programs its banks through `$7FFD-$7FFF`. The CHR ROM size tells them
//! apart, the same heuristic most emulators use.

use std::borrow::Cow;

use crate::cartridge::header::{Header, Mirroring};
use crate::cartridge::mapper::banks::{allocate_prg_ram, ChrMap, ChrStorage, PrgMap};
use crate::cartridge::mapper::{Mapper, MapperState, PpuFetchKind};
use crate::memory::cpu as cpu_mem;
use crate::reset_kind::ResetKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Board {
    Bnrom,
    Nina001,
}

#[derive(Debug, Clone)]
pub struct Bnrom {
    prg_rom: Vec<u8>,
    prg_ram: Box<[u8]>,
    chr: ChrStorage,
    prg_map: PrgMap,
    chr_map: ChrMap,
    mirroring: Mirroring,
    board: Board,
    prg_bank: u8,
    chr_banks: [u8; 2],
}

impl Bnrom {
    pub fn new(header: &Header, prg_rom: Vec<u8>, chr_rom: Vec<u8>, trainer: Option<&[u8]>) -> Self {
        let board = if header.chr_rom_size > 8 * 1024 {
            Board::Nina001
        } else {
            Board::Bnrom
        };
        let chr = ChrStorage::select(header, chr_rom);
        let chr_map = ChrMap::new(chr.len());
        let prg_map = PrgMap::new(prg_rom.len());
        Self {
            prg_ram: allocate_prg_ram(header, trainer),
            prg_rom,
            chr,
            prg_map,
            chr_map,
            mirroring: header.mirroring,
            board,
            prg_bank: 0,
            chr_banks: [0, 1],
        }
    }

    fn apply(&mut self) {
        self.prg_map.set_32k(self.prg_bank as isize);
        if self.board == Board::Nina001 {
            self.chr_map.set_4k(0, self.chr_banks[0] as isize);
            self.chr_map.set_4k(1, self.chr_banks[1] as isize);
        }
    }
}

impl Mapper for Bnrom {
    fn reset(&mut self, kind: ResetKind) {
        if matches!(kind, ResetKind::PowerOn) {
            self.prg_bank = 0;
            self.chr_banks = [0, 1];
            self.apply();
        }
    }

    fn cpu_read(&mut self, addr: u16) -> Option<u8> {
        match addr {
            cpu_mem::PRG_RAM_START..=cpu_mem::PRG_RAM_END => {
                let len = self.prg_ram.len();
                Some(self.prg_ram[(addr - cpu_mem::PRG_RAM_START) as usize % len])
            }
            cpu_mem::PRG_ROM_START..=cpu_mem::CPU_ADDR_END => {
                Some(self.prg_map.read(&self.prg_rom, addr))
            }
            _ => None,
        }
    }

    fn cpu_write(&mut self, addr: u16, data: u8, _instr: u64) {
        match addr {
            cpu_mem::PRG_RAM_START..=cpu_mem::PRG_RAM_END => {
                if self.board == Board::Nina001 {
                    match addr {
                        0x7FFD => {
                            self.prg_bank = data & 0x01;
                            self.apply();
                        }
                        0x7FFE => {
                            self.chr_banks[0] = data & 0x0F;
                            self.apply();
                        }
                        0x7FFF => {
                            self.chr_banks[1] = data & 0x0F;
                            self.apply();
                        }
                        _ => {}
                    }
                }
                let len = self.prg_ram.len();
                self.prg_ram[(addr - cpu_mem::PRG_RAM_START) as usize % len] = data;
            }
            cpu_mem::PRG_ROM_START..=cpu_mem::CPU_ADDR_END => {
                if self.board == Board::Bnrom {
                    self.prg_bank = data;
                    self.apply();
                }
            }
            _ => {}
        }
    }

    fn ppu_read(&mut self, addr: u16, _kind: PpuFetchKind) -> Option<u8> {
        Some(self.chr.read(&self.chr_map, addr))
    }

    fn ppu_write(&mut self, addr: u16, data: u8) -> bool {
        self.chr.write(&self.chr_map, addr, data);
        true
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    fn prg_ram(&self) -> Option<&[u8]> {
        Some(&self.prg_ram)
    }

    fn prg_ram_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.prg_ram)
    }

    fn chr_ram(&self) -> Option<&[u8]> {
        self.chr.as_ram()
    }

    fn chr_ram_mut(&mut self) -> Option<&mut [u8]> {
        self.chr.as_ram_mut()
    }

    fn mapper_id(&self) -> u16 {
        34
    }

    fn name(&self) -> Cow<'static, str> {
        match self.board {
            Board::Bnrom => Cow::Borrowed("BNROM"),
            Board::Nina001 => Cow::Borrowed("NINA-001"),
        }
    }

    fn save_state(&self) -> MapperState {
        MapperState::Nina001 {
            prg_bank: self.prg_bank,
            chr_banks: self.chr_banks,
        }
    }

    fn load_state(&mut self, state: &MapperState) {
        if let MapperState::Nina001 {
            prg_bank,
            chr_banks,
        } = state
        {
            self.prg_bank = *prg_bank;
            self.chr_banks = *chr_banks;
            self.apply();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::header::RomFormat;

    fn header(chr_rom: usize) -> Header {
        Header {
            format: RomFormat::INes,
            mapper: 34,
            mirroring: Mirroring::Vertical,
            battery_backed_ram: false,
            trainer_present: false,
            prg_rom_size: 64 * 1024,
            chr_rom_size: chr_rom,
            chr_ram_size: if chr_rom == 0 { 8 * 1024 } else { 0 },
            prg_ram_size: 8 * 1024,
        }
    }

    #[test]
    fn bnrom_switches_32k() {
        let prg: Vec<u8> = (0..2u8).flat_map(|b| vec![b; 32 * 1024]).collect();
        let mut board = Bnrom::new(&header(0), prg, vec![], None);
        board.cpu_write(0x8000, 1, 0);
        assert_eq!(board.cpu_read(0x8000), Some(1));
    }

    #[test]
    fn nina001_banks_through_work_ram_tail() {
        let prg: Vec<u8> = (0..2u8).flat_map(|b| vec![b; 32 * 1024]).collect();
        let chr: Vec<u8> = (0..8u8).flat_map(|b| vec![b; 4 * 1024]).collect();
        let mut board = Bnrom::new(&header(chr.len()), prg, chr, None);
        board.cpu_write(0x7FFE, 3, 0);
        assert_eq!(board.ppu_read(0x0000, PpuFetchKind::Data), Some(3));
        // PRG writes must not bank-switch on NINA-001.
        board.cpu_write(0x8000, 1, 0);
        assert_eq!(board.cpu_read(0x8000), Some(0));
    }
}
