//! Mapper 3 (CNROM).
//!
//! Fixed PRG, switchable 8 KiB CHR. The board has no write decoder, so a
//! register write drives the data bus against the ROM output: the value the
//! latch sees is the written byte ANDed with the ROM byte at that address.

use std::borrow::Cow;

use crate::cartridge::header::{Header, Mirroring};
use crate::cartridge::mapper::banks::{allocate_prg_ram, ChrMap, ChrStorage, PrgMap};
use crate::cartridge::mapper::{Mapper, MapperState, PpuFetchKind};
use crate::memory::cpu as cpu_mem;
use crate::reset_kind::ResetKind;

#[derive(Debug, Clone)]
pub struct Cnrom {
    prg_rom: Vec<u8>,
    prg_ram: Box<[u8]>,
    chr: ChrStorage,
    prg_map: PrgMap,
    chr_map: ChrMap,
    mirroring: Mirroring,
    bank: u8,
}

impl Cnrom {
    pub fn new(header: &Header, prg_rom: Vec<u8>, chr_rom: Vec<u8>, trainer: Option<&[u8]>) -> Self {
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
            bank: 0,
        }
    }
}

impl Mapper for Cnrom {
    fn reset(&mut self, kind: ResetKind) {
        if matches!(kind, ResetKind::PowerOn) {
            self.bank = 0;
            self.chr_map.set_8k(0);
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
                let len = self.prg_ram.len();
                self.prg_ram[(addr - cpu_mem::PRG_RAM_START) as usize % len] = data;
            }
            cpu_mem::PRG_ROM_START..=cpu_mem::CPU_ADDR_END => {
                // Bus conflict: the ROM drives the bus at the same time.
                self.bank = data & self.prg_map.read(&self.prg_rom, addr);
                self.chr_map.set_8k(self.bank as isize);
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
        3
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("CNROM")
    }

    fn save_state(&self) -> MapperState {
        MapperState::SingleRegister { reg: self.bank }
    }

    fn load_state(&mut self, state: &MapperState) {
        if let MapperState::SingleRegister { reg } = state {
            self.bank = *reg;
            self.chr_map.set_8k(self.bank as isize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::header::RomFormat;

    #[test]
    fn bus_conflict_ands_with_rom_byte() {
        let mut prg = vec![0xFF; 32 * 1024];
        prg[0] = 0x01; // ROM byte at $8000
        let chr: Vec<u8> = (0..4u8).flat_map(|b| vec![b; 8 * 1024]).collect();
        let header = Header {
            format: RomFormat::INes,
            mapper: 3,
            mirroring: Mirroring::Horizontal,
            battery_backed_ram: false,
            trainer_present: false,
            prg_rom_size: prg.len(),
            chr_rom_size: chr.len(),
            chr_ram_size: 0,
            prg_ram_size: 8 * 1024,
        };
        let mut cnrom = Cnrom::new(&header, prg, chr, None);
        // Writing 0x03 at $8000 where ROM holds 0x01 latches bank 1.
        cnrom.cpu_write(0x8000, 0x03, 0);
        assert_eq!(cnrom.ppu_read(0x0000, PpuFetchKind::Data), Some(1));
    }
}
