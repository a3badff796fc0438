//! Mapper 0 (NROM).
//!
//! No banking at all: 16 or 32 KiB of PRG at `$8000-$FFFF` (16 KiB images
//! mirror into the upper half) and 8 KiB of CHR ROM or RAM. Also the
//! fallback board for unknown mapper ids.

use std::borrow::Cow;

use crate::cartridge::header::{Header, Mirroring};
use crate::cartridge::mapper::banks::{allocate_prg_ram, ChrMap, ChrStorage, PrgMap};
use crate::cartridge::mapper::{Mapper, MapperState, PpuFetchKind};
use crate::memory::cpu as cpu_mem;
use crate::reset_kind::ResetKind;

#[derive(Debug, Clone)]
pub struct Nrom {
    prg_rom: Vec<u8>,
    prg_ram: Box<[u8]>,
    chr: ChrStorage,
    prg_map: PrgMap,
    chr_map: ChrMap,
    mirroring: Mirroring,
    battery: bool,
}

impl Nrom {
    pub fn new(header: &Header, prg_rom: Vec<u8>, chr_rom: Vec<u8>, trainer: Option<&[u8]>) -> Self {
        let chr = ChrStorage::select(header, chr_rom);
        let prg_map = PrgMap::new(prg_rom.len());
        let chr_map = ChrMap::new(chr.len());
        Self {
            prg_ram: allocate_prg_ram(header, trainer),
            prg_rom,
            chr,
            prg_map,
            chr_map,
            mirroring: header.mirroring,
            battery: header.battery_backed_ram,
        }
    }
}

impl Mapper for Nrom {
    fn reset(&mut self, _kind: ResetKind) {}

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
        if (cpu_mem::PRG_RAM_START..=cpu_mem::PRG_RAM_END).contains(&addr) {
            let len = self.prg_ram.len();
            self.prg_ram[(addr - cpu_mem::PRG_RAM_START) as usize % len] = data;
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

    fn prg_save_ram(&self) -> Option<&[u8]> {
        self.battery.then_some(&*self.prg_ram)
    }

    fn prg_save_ram_mut(&mut self) -> Option<&mut [u8]> {
        if self.battery {
            Some(&mut self.prg_ram)
        } else {
            None
        }
    }

    fn chr_ram(&self) -> Option<&[u8]> {
        self.chr.as_ram()
    }

    fn chr_ram_mut(&mut self) -> Option<&mut [u8]> {
        self.chr.as_ram_mut()
    }

    fn mapper_id(&self) -> u16 {
        0
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("NROM")
    }

    fn save_state(&self) -> MapperState {
        MapperState::Nrom
    }

    fn load_state(&mut self, _state: &MapperState) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::header::RomFormat;

    fn header(prg: usize, chr: usize) -> Header {
        Header {
            format: RomFormat::INes,
            mapper: 0,
            mirroring: Mirroring::Horizontal,
            battery_backed_ram: false,
            trainer_present: false,
            prg_rom_size: prg,
            chr_rom_size: chr,
            chr_ram_size: if chr == 0 { 8 * 1024 } else { 0 },
            prg_ram_size: 8 * 1024,
        }
    }

    #[test]
    fn mirrors_16k_prg_into_upper_half() {
        let mut prg = vec![0u8; 16 * 1024];
        prg[0] = 0x42;
        let mut nrom = Nrom::new(&header(prg.len(), 0), prg, vec![], None);
        assert_eq!(nrom.cpu_read(0x8000), Some(0x42));
        assert_eq!(nrom.cpu_read(0xC000), Some(0x42));
    }

    #[test]
    fn work_ram_round_trips() {
        let mut nrom = Nrom::new(&header(16 * 1024, 0), vec![0; 16 * 1024], vec![], None);
        nrom.cpu_write(0x6123, 0x77, 0);
        assert_eq!(nrom.cpu_read(0x6123), Some(0x77));
    }

    #[test]
    fn declines_addresses_below_work_ram() {
        let mut nrom = Nrom::new(&header(16 * 1024, 0), vec![0; 16 * 1024], vec![], None);
        assert_eq!(nrom.cpu_read(0x5000), None);
    }
}
