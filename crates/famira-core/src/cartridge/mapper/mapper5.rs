//! Mapper 5 (MMC5).
//!
//! The most capable licensed board. Beyond four PRG modes with per-slot
//! RAM/ROM selection and four CHR modes with separate background and sprite
//! bank sets, it owns 1 KiB of ExRAM that can stand in for a nametable,
//! feed per-tile attributes, or act as plain CPU RAM; a fill-mode virtual
//! nametable; a vertical split screen; a scanline-compare IRQ; a 16-bit
//! CPU-cycle timer; an 8x8 hardware multiplier; and two pulse channels plus
//! a PCM level that mix into the APU output.
//!
//! | Area | Address range | Behaviour                                   |
//! |------|---------------|---------------------------------------------|
//! | CPU  | `$5000-$5015` | Expansion audio registers                   |
//! | CPU  | `$5100-$5107` | PRG/CHR mode, RAM protect, ExRAM/fill setup |
//! | CPU  | `$5113-$5130` | PRG and CHR bank registers                  |
//! | CPU  | `$5200-$5206` | Split screen, scanline IRQ, multiplier      |
//! | CPU  | `$5209-$520A` | CPU-cycle timer                             |
//! | CPU  | `$5C00-$5FFF` | ExRAM window                                |
//! | CPU  | `$6000-$FFFF` | Banked PRG RAM/ROM                          |
//! | PPU  | `$0000-$1FFF` | Banked CHR, background/sprite sets          |
//! | PPU  | `$2000-$3EFF` | Nametable mapping incl. ExRAM/fill/split    |

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::cartridge::header::{Header, Mirroring};
use crate::cartridge::mapper::banks::{ChrMap, ChrStorage, PrgMap};
use crate::cartridge::mapper::{
    Capabilities, Mapper, MapperState, NametableKind, PpuFetchKind,
};
use crate::memory::cpu as cpu_mem;
use crate::reset_kind::ResetKind;

const PRG_SLOT_SIZE: usize = 8 * 1024;
const EXRAM_SIZE: usize = 1024;
/// MMC5 boards carry up to 64 KiB of work RAM.
const PRG_RAM_SIZE: usize = 64 * 1024;

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 1, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0],
    [1, 0, 0, 1, 1, 1, 1, 1],
];

const LENGTH_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, 12, 16, 24, 18, 48, 20, 96, 22,
    192, 24, 72, 26, 16, 28, 32, 30,
];

/// ExRAM usage selected by `$5104`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExRamMode {
    Nametable,
    ExtendedAttributes,
    CpuRam,
    CpuRamReadOnly,
}

impl ExRamMode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => ExRamMode::Nametable,
            1 => ExRamMode::ExtendedAttributes,
            2 => ExRamMode::CpuRam,
            _ => ExRamMode::CpuRamReadOnly,
        }
    }

    fn bits(self) -> u8 {
        match self {
            ExRamMode::Nametable => 0,
            ExRamMode::ExtendedAttributes => 1,
            ExRamMode::CpuRam => 2,
            ExRamMode::CpuRamReadOnly => 3,
        }
    }
}

/// MMC5 pulse channel: APU pulse minus the sweep unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mmc5Pulse {
    duty: u8,
    duty_pos: u8,
    period: u16,
    timer: u16,
    length: u8,
    halt: bool,
    constant_volume: bool,
    volume: u8,
    envelope_counter: u8,
    envelope_divider: u8,
    envelope_start: bool,
    enabled: bool,
}

impl Default for Mmc5Pulse {
    fn default() -> Self {
        Self {
            duty: 0,
            duty_pos: 0,
            period: 0,
            timer: 0,
            length: 0,
            halt: false,
            constant_volume: false,
            volume: 0,
            envelope_counter: 0,
            envelope_divider: 0,
            envelope_start: false,
            enabled: false,
        }
    }
}

impl Mmc5Pulse {
    fn write_control(&mut self, data: u8) {
        self.duty = data >> 6;
        self.halt = data & 0x20 != 0;
        self.constant_volume = data & 0x10 != 0;
        self.volume = data & 0x0F;
    }

    fn write_timer_low(&mut self, data: u8) {
        self.period = (self.period & 0x0700) | data as u16;
    }

    fn write_timer_high(&mut self, data: u8) {
        self.period = (self.period & 0x00FF) | (((data & 0x07) as u16) << 8);
        if self.enabled {
            self.length = LENGTH_TABLE[(data >> 3) as usize];
        }
        self.duty_pos = 0;
        self.envelope_start = true;
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.length = 0;
        }
    }

    fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = 2 * self.period + 1;
            self.duty_pos = (self.duty_pos + 1) & 7;
        } else {
            self.timer -= 1;
        }
    }

    /// MMC5 pulses run their envelope/length from an internal sequencer at
    /// the same quarter/half rates as the APU; we approximate with a fixed
    /// 7457-cycle quarter tick driven by the board clock.
    fn clock_quarter(&mut self) {
        if self.envelope_start {
            self.envelope_start = false;
            self.envelope_counter = 15;
            self.envelope_divider = self.volume;
        } else if self.envelope_divider == 0 {
            self.envelope_divider = self.volume;
            if self.envelope_counter > 0 {
                self.envelope_counter -= 1;
            } else if self.halt {
                self.envelope_counter = 15;
            }
        } else {
            self.envelope_divider -= 1;
        }
    }

    fn clock_half(&mut self) {
        if !self.halt && self.length > 0 {
            self.length -= 1;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled || self.length == 0 || self.period < 8 {
            return 0;
        }
        if DUTY_TABLE[self.duty as usize][self.duty_pos as usize] == 0 {
            return 0;
        }
        if self.constant_volume {
            self.volume
        } else {
            self.envelope_counter
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mmc5State {
    pub prg_mode: u8,
    pub chr_mode: u8,
    pub ram_protect: [u8; 2],
    pub exram_mode: u8,
    pub nametable_map: u8,
    pub fill_tile: u8,
    pub fill_attr: u8,
    pub prg_ram_bank: u8,
    pub prg_regs: [u8; 4],
    pub chr_regs_a: [u8; 8],
    pub chr_regs_b: [u8; 4],
    pub last_chr_set_b: bool,
    pub split_control: u8,
    pub split_scroll: u8,
    pub split_bank: u8,
    pub irq_compare: u8,
    pub irq_enabled: bool,
    pub irq_pending: bool,
    pub in_frame: bool,
    pub current_line: u16,
    pub tile_fetch: u8,
    pub multiplicand: u8,
    pub multiplier: u8,
    pub timer_counter: u16,
    pub timer_running: bool,
    pub timer_pending: bool,
    pub sprite_size_16: bool,
    pub pulses: [Mmc5PulseState; 2],
    pub pcm_level: u8,
    pub exram: Vec<u8>,
}

/// Serialized MMC5 pulse (mirrors [`Mmc5Pulse`] field-for-field).
pub type Mmc5PulseState = Mmc5Pulse;

#[derive(Debug, Clone)]
pub struct Mmc5 {
    prg_rom: Vec<u8>,
    prg_ram: Box<[u8]>,
    chr: ChrStorage,
    exram: Box<[u8]>,
    battery: bool,

    prg_mode: u8,
    chr_mode: u8,
    /// `$5102`/`$5103`; RAM writes require the documented 2,1 pattern.
    ram_protect: [u8; 2],
    exram_mode: ExRamMode,
    /// `$5105`: two selector bits per nametable.
    nametable_map: u8,
    fill_tile: u8,
    fill_attr: u8,

    prg_ram_bank: u8,
    /// `$5114-$5117`; bit 7 selects ROM, clear selects RAM (except `$5117`).
    prg_regs: [u8; 4],
    prg_map: PrgMap,
    /// RAM base per slot when the slot is RAM-mapped.
    ram_slots: [Option<usize>; 4],
    rom_slots: [bool; 4],

    /// Sprite set (`$5120-$5127`) and background set (`$5128-$512B`).
    chr_regs_a: [u8; 8],
    chr_regs_b: [u8; 4],
    chr_map_a: ChrMap,
    chr_map_b: ChrMap,
    last_chr_set_b: bool,

    split_control: u8,
    split_scroll: u8,
    split_bank: u8,
    split_map: ChrMap,

    irq_compare: u8,
    irq_enabled: bool,
    irq_pending: bool,
    in_frame: bool,
    current_line: u16,
    /// Background tile fetches seen since the scanline hook; drives the
    /// split-screen column comparison.
    tile_fetch: u8,

    multiplicand: u8,
    multiplier: u8,

    timer_counter: u16,
    timer_running: bool,
    timer_pending: bool,

    /// Mirror of PPUCTRL bit 5, delivered through the register hook.
    sprite_size_16: bool,
    rendering_enabled: bool,

    pulses: [Mmc5Pulse; 2],
    pcm_level: u8,
    /// CPU-cycle counter for the audio quarter/half sequencer.
    audio_divider: u16,
    audio_step: u8,
}

impl Mmc5 {
    pub fn new(header: &Header, prg_rom: Vec<u8>, chr_rom: Vec<u8>, _trainer: Option<&[u8]>) -> Self {
        let chr = ChrStorage::select(header, chr_rom);
        let chr_len = chr.len();
        let mut mapper = Self {
            prg_ram: vec![0u8; PRG_RAM_SIZE].into_boxed_slice(),
            prg_map: PrgMap::new(prg_rom.len()),
            prg_rom,
            chr,
            exram: vec![0u8; EXRAM_SIZE].into_boxed_slice(),
            battery: header.battery_backed_ram,
            prg_mode: 3,
            chr_mode: 3,
            ram_protect: [0; 2],
            exram_mode: ExRamMode::Nametable,
            nametable_map: 0,
            fill_tile: 0,
            fill_attr: 0,
            prg_ram_bank: 0,
            prg_regs: [0xFF; 4],
            ram_slots: [None; 4],
            rom_slots: [true; 4],
            chr_regs_a: [0xFF; 8],
            chr_regs_b: [0xFF; 4],
            chr_map_a: ChrMap::new(chr_len),
            chr_map_b: ChrMap::new(chr_len),
            last_chr_set_b: false,
            split_control: 0,
            split_scroll: 0,
            split_bank: 0,
            split_map: ChrMap::new(chr_len),
            irq_compare: 0,
            irq_enabled: false,
            irq_pending: false,
            in_frame: false,
            current_line: 0,
            tile_fetch: 0,
            multiplicand: 0xFF,
            multiplier: 0xFF,
            timer_counter: 0,
            timer_running: false,
            timer_pending: false,
            sprite_size_16: false,
            rendering_enabled: false,
            pulses: [Mmc5Pulse::default(); 2],
            pcm_level: 0,
            audio_divider: 0,
            audio_step: 0,
        };
        mapper.apply_prg();
        mapper.apply_chr();
        mapper
    }

    fn ram_writable(&self) -> bool {
        self.ram_protect[0] & 0x03 == 0x02 && self.ram_protect[1] & 0x03 == 0x01
    }

    fn apply_prg(&mut self) {
        // $5117 is always ROM; the others carry a ROM-select in bit 7.
        let regs = self.prg_regs;
        let rom_bank = |reg: u8| (reg & 0x7F) as isize;
        let ram_base = |reg: u8| ((reg & 0x07) as usize * PRG_SLOT_SIZE) % PRG_RAM_SIZE;

        self.ram_slots = [None; 4];
        self.rom_slots = [true; 4];

        match self.prg_mode & 0x03 {
            0 => {
                self.prg_map.set_32k(rom_bank(regs[3]) >> 2);
            }
            1 => {
                if regs[1] & 0x80 != 0 {
                    self.prg_map.set_16k(0, rom_bank(regs[1]) >> 1);
                } else {
                    self.rom_slots[0] = false;
                    self.rom_slots[1] = false;
                    let base = ram_base(regs[1] & !1);
                    self.ram_slots[0] = Some(base);
                    self.ram_slots[1] = Some(base + PRG_SLOT_SIZE);
                }
                self.prg_map.set_16k(1, rom_bank(regs[3]) >> 1);
            }
            2 => {
                if regs[1] & 0x80 != 0 {
                    self.prg_map.set_16k(0, rom_bank(regs[1]) >> 1);
                } else {
                    self.rom_slots[0] = false;
                    self.rom_slots[1] = false;
                    let base = ram_base(regs[1] & !1);
                    self.ram_slots[0] = Some(base);
                    self.ram_slots[1] = Some(base + PRG_SLOT_SIZE);
                }
                if regs[2] & 0x80 != 0 {
                    self.prg_map.set_8k(2, rom_bank(regs[2]));
                } else {
                    self.rom_slots[2] = false;
                    self.ram_slots[2] = Some(ram_base(regs[2]));
                }
                self.prg_map.set_8k(3, rom_bank(regs[3]));
            }
            _ => {
                for slot in 0..3 {
                    let reg = regs[slot];
                    if reg & 0x80 != 0 {
                        self.prg_map.set_8k(slot, rom_bank(reg));
                    } else {
                        self.rom_slots[slot] = false;
                        self.ram_slots[slot] = Some(ram_base(reg));
                    }
                }
                self.prg_map.set_8k(3, rom_bank(regs[3]));
            }
        }
    }

    fn apply_chr(&mut self) {
        let a = self.chr_regs_a;
        let b = self.chr_regs_b;
        match self.chr_mode & 0x03 {
            0 => {
                self.chr_map_a.set_8k(a[7] as isize);
                self.chr_map_b.set_8k(b[3] as isize);
            }
            1 => {
                self.chr_map_a.set_4k(0, a[3] as isize);
                self.chr_map_a.set_4k(1, a[7] as isize);
                self.chr_map_b.set_4k(0, b[3] as isize);
                self.chr_map_b.set_4k(1, b[3] as isize);
            }
            2 => {
                for region in 0..4 {
                    self.chr_map_a.set_2k(region, a[region * 2 + 1] as isize);
                }
                self.chr_map_b.set_2k(0, b[1] as isize);
                self.chr_map_b.set_2k(1, b[3] as isize);
                self.chr_map_b.set_2k(2, b[1] as isize);
                self.chr_map_b.set_2k(3, b[3] as isize);
            }
            _ => {
                for slot in 0..8 {
                    self.chr_map_a.set_1k(slot, a[slot] as isize);
                }
                for slot in 0..8 {
                    self.chr_map_b.set_1k(slot, b[slot & 3] as isize);
                }
            }
        }
        self.split_map.set_4k(0, self.split_bank as isize);
        self.split_map.set_4k(1, self.split_bank as isize);
    }

    /// Selector bits for one of the four logical nametables.
    fn nametable_select(&self, addr: u16) -> u8 {
        let table = ((addr >> 10) & 3) as u8;
        (self.nametable_map >> (table * 2)) & 0x03
    }

    fn split_enabled(&self) -> bool {
        self.split_control & 0x80 != 0
            && matches!(
                self.exram_mode,
                ExRamMode::Nametable | ExRamMode::ExtendedAttributes
            )
    }

    /// Whether the current background tile column falls inside the split
    /// region. The fetch counter restarts on the scanline hook; columns 0-31
    /// cover the visible line.
    fn split_active(&self) -> bool {
        if !self.split_enabled() || !self.rendering_enabled {
            return false;
        }
        let tile = self.tile_fetch.min(31);
        let boundary = self.split_control & 0x1F;
        if self.split_control & 0x40 == 0 {
            tile < boundary
        } else {
            tile >= boundary
        }
    }

    fn split_row(&self) -> u16 {
        let y = (self.current_line + self.split_scroll as u16) % 240;
        y / 8
    }

    fn read_register(&mut self, addr: u16) -> Option<u8> {
        match addr {
            0x5015 => {
                let mut status = 0u8;
                if self.pulses[0].length > 0 {
                    status |= 0x01;
                }
                if self.pulses[1].length > 0 {
                    status |= 0x02;
                }
                Some(status)
            }
            0x5204 => {
                let mut status = 0u8;
                if self.irq_pending {
                    status |= 0x80;
                }
                if self.in_frame {
                    status |= 0x40;
                }
                self.irq_pending = false;
                Some(status)
            }
            0x5205 => Some((self.multiplicand as u16 * self.multiplier as u16) as u8),
            0x5206 => Some(((self.multiplicand as u16 * self.multiplier as u16) >> 8) as u8),
            0x5209 => {
                let status = if self.timer_pending { 0x80 } else { 0 };
                self.timer_pending = false;
                Some(status)
            }
            0x5C00..=0x5FFF => match self.exram_mode {
                ExRamMode::CpuRam | ExRamMode::CpuRamReadOnly => {
                    Some(self.exram[(addr as usize - 0x5C00) % EXRAM_SIZE])
                }
                _ => None,
            },
            _ => None,
        }
    }

    fn write_register(&mut self, addr: u16, data: u8) {
        match addr {
            0x5000 => self.pulses[0].write_control(data),
            0x5002 => self.pulses[0].write_timer_low(data),
            0x5003 => self.pulses[0].write_timer_high(data),
            0x5004 => self.pulses[1].write_control(data),
            0x5006 => self.pulses[1].write_timer_low(data),
            0x5007 => self.pulses[1].write_timer_high(data),
            0x5010 => {} // PCM mode/IRQ bits; read mode is not modeled
            0x5011 => self.pcm_level = data,
            0x5015 => {
                self.pulses[0].set_enabled(data & 0x01 != 0);
                self.pulses[1].set_enabled(data & 0x02 != 0);
            }
            0x5100 => {
                self.prg_mode = data & 0x03;
                self.apply_prg();
            }
            0x5101 => {
                self.chr_mode = data & 0x03;
                self.apply_chr();
            }
            0x5102 => self.ram_protect[0] = data,
            0x5103 => self.ram_protect[1] = data,
            0x5104 => self.exram_mode = ExRamMode::from_bits(data),
            0x5105 => self.nametable_map = data,
            0x5106 => self.fill_tile = data,
            0x5107 => {
                let bits = data & 0x03;
                self.fill_attr = bits | (bits << 2) | (bits << 4) | (bits << 6);
            }
            0x5113 => self.prg_ram_bank = data & 0x07,
            0x5114..=0x5117 => {
                self.prg_regs[(addr - 0x5114) as usize] = data;
                self.apply_prg();
            }
            0x5120..=0x5127 => {
                self.chr_regs_a[(addr - 0x5120) as usize] = data;
                self.last_chr_set_b = false;
                self.apply_chr();
            }
            0x5128..=0x512B => {
                self.chr_regs_b[(addr - 0x5128) as usize] = data;
                self.last_chr_set_b = true;
                self.apply_chr();
            }
            0x5130 => {} // upper CHR bits; only meaningful beyond 1 MiB CHR
            0x5200 => self.split_control = data,
            0x5201 => self.split_scroll = data,
            0x5202 => {
                self.split_bank = data;
                self.apply_chr();
            }
            0x5203 => self.irq_compare = data,
            0x5204 => self.irq_enabled = data & 0x80 != 0,
            0x5205 => self.multiplicand = data,
            0x5206 => self.multiplier = data,
            0x5209 => {
                self.timer_counter = (self.timer_counter & 0xFF00) | data as u16;
                self.timer_running = true;
            }
            0x520A => {
                self.timer_counter = (self.timer_counter & 0x00FF) | ((data as u16) << 8);
            }
            0x5C00..=0x5FFF => match self.exram_mode {
                ExRamMode::CpuRamReadOnly => {}
                _ => self.exram[(addr as usize - 0x5C00) % EXRAM_SIZE] = data,
            },
            _ => {}
        }
    }
}

impl Mapper for Mmc5 {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            nametable_override: true,
            per_tile_attributes: true,
            cpu_clock_hook: true,
            end_scanline_hook: true,
            ppu_register_hook: true,
            expansion_audio: true,
            ..Capabilities::default()
        }
    }

    fn reset(&mut self, kind: ResetKind) {
        if matches!(kind, ResetKind::PowerOn) {
            self.prg_mode = 3;
            self.chr_mode = 3;
            self.ram_protect = [0; 2];
            self.exram_mode = ExRamMode::Nametable;
            self.nametable_map = 0;
            self.fill_tile = 0;
            self.fill_attr = 0;
            self.prg_ram_bank = 0;
            self.prg_regs = [0xFF; 4];
            self.chr_regs_a = [0xFF; 8];
            self.chr_regs_b = [0xFF; 4];
            self.exram.fill(0);
            self.pulses = [Mmc5Pulse::default(); 2];
            self.pcm_level = 0;
        }
        self.split_control = 0;
        self.irq_enabled = false;
        self.irq_pending = false;
        self.in_frame = false;
        self.timer_running = false;
        self.timer_pending = false;
        self.apply_prg();
        self.apply_chr();
    }

    fn cpu_read(&mut self, addr: u16) -> Option<u8> {
        match addr {
            0x5000..=0x5FFF => self.read_register(addr),
            cpu_mem::PRG_RAM_START..=cpu_mem::PRG_RAM_END => {
                let base = (self.prg_ram_bank as usize * PRG_SLOT_SIZE) % PRG_RAM_SIZE;
                Some(self.prg_ram[base + (addr - cpu_mem::PRG_RAM_START) as usize])
            }
            cpu_mem::PRG_ROM_START..=cpu_mem::CPU_ADDR_END => {
                let slot = ((addr as usize) >> 13) & 3;
                if self.rom_slots[slot] {
                    Some(self.prg_map.read(&self.prg_rom, addr))
                } else {
                    let base = self.ram_slots[slot].unwrap_or(0);
                    Some(self.prg_ram[(base + (addr as usize & (PRG_SLOT_SIZE - 1))) % PRG_RAM_SIZE])
                }
            }
            _ => None,
        }
    }

    fn cpu_write(&mut self, addr: u16, data: u8, _instr: u64) {
        match addr {
            0x5000..=0x5FFF => self.write_register(addr, data),
            cpu_mem::PRG_RAM_START..=cpu_mem::PRG_RAM_END => {
                if self.ram_writable() {
                    let base = (self.prg_ram_bank as usize * PRG_SLOT_SIZE) % PRG_RAM_SIZE;
                    self.prg_ram[base + (addr - cpu_mem::PRG_RAM_START) as usize] = data;
                }
            }
            cpu_mem::PRG_ROM_START..=cpu_mem::CPU_ADDR_END => {
                let slot = ((addr as usize) >> 13) & 3;
                if !self.rom_slots[slot] && self.ram_writable() {
                    let base = self.ram_slots[slot].unwrap_or(0);
                    self.prg_ram[(base + (addr as usize & (PRG_SLOT_SIZE - 1))) % PRG_RAM_SIZE] =
                        data;
                }
            }
            _ => {}
        }
    }

    fn ppu_read(&mut self, addr: u16, kind: PpuFetchKind) -> Option<u8> {
        if kind == PpuFetchKind::Background && self.split_active() {
            return Some(self.chr.read(&self.split_map, addr));
        }
        let map = if self.sprite_size_16 {
            // 8x16 sprites: sprite fetches use set A, background set B,
            // CPU accesses follow the last set written.
            match kind {
                PpuFetchKind::Sprite => &self.chr_map_a,
                PpuFetchKind::Background => &self.chr_map_b,
                PpuFetchKind::Data if self.last_chr_set_b => &self.chr_map_b,
                PpuFetchKind::Data => &self.chr_map_a,
            }
        } else if self.last_chr_set_b {
            &self.chr_map_b
        } else {
            &self.chr_map_a
        };
        Some(self.chr.read(map, addr))
    }

    fn ppu_write(&mut self, addr: u16, data: u8) -> bool {
        let map = if self.last_chr_set_b {
            self.chr_map_b
        } else {
            self.chr_map_a
        };
        self.chr.write(&map, addr, data);
        true
    }

    fn mirroring(&self) -> Mirroring {
        // $5105 can express layouts the PPU enum cannot; collapse to the
        // closest standard arrangement for the CIRAM fallback path.
        let pages: Vec<u8> = (0..4).map(|t| (self.nametable_map >> (t * 2)) & 3).collect();
        match (pages[0], pages[1], pages[2], pages[3]) {
            (0, 1, 0, 1) => Mirroring::Vertical,
            (0, 0, 1, 1) => Mirroring::Horizontal,
            (1, 1, 1, 1) => Mirroring::SingleScreenUpper,
            (0, 0, 0, 0) => Mirroring::SingleScreenLower,
            _ => Mirroring::FourScreen,
        }
    }

    fn irq_pending(&self) -> bool {
        (self.irq_pending && self.irq_enabled) || self.timer_pending
    }

    fn cpu_clock(&mut self, cycles: u32) {
        for _ in 0..cycles {
            if self.timer_running && self.timer_counter > 0 {
                self.timer_counter -= 1;
                if self.timer_counter == 0 {
                    self.timer_running = false;
                    self.timer_pending = true;
                }
            }
        }
    }

    fn end_scanline(&mut self, line: u16) {
        self.tile_fetch = 0;
        self.current_line = line;
        if line == 0 {
            self.in_frame = true;
            self.irq_pending = false;
        } else if line >= 239 {
            self.in_frame = false;
        }
        if line as u8 == self.irq_compare && self.irq_compare != 0 && line < 240 {
            self.irq_pending = true;
        }
    }

    fn ppu_register_write(&mut self, addr: u16, data: u8) {
        match addr & 0x2007 {
            0x2000 => self.sprite_size_16 = data & 0x20 != 0,
            0x2001 => self.rendering_enabled = data & 0x18 != 0,
            _ => {}
        }
    }

    fn read_nametable(&mut self, addr: u16, kind: NametableKind) -> Option<u8> {
        if kind == NametableKind::Tile {
            self.tile_fetch = self.tile_fetch.wrapping_add(1);
        }

        // Split screen takes precedence inside its column range.
        if self.split_active() && kind != NametableKind::Cpu {
            let tile = self.tile_fetch.min(31) as u16;
            return match kind {
                NametableKind::Tile => {
                    let index = (self.split_row() * 32 + tile) as usize % EXRAM_SIZE;
                    Some(self.exram[index])
                }
                NametableKind::Attribute => {
                    let index =
                        0x3C0 + ((self.split_row() / 4) * 8 + tile / 4) as usize % 0x40;
                    Some(self.exram[index % EXRAM_SIZE])
                }
                NametableKind::Cpu => None,
            };
        }

        match self.nametable_select(addr) {
            2 => {
                if matches!(
                    self.exram_mode,
                    ExRamMode::Nametable | ExRamMode::ExtendedAttributes
                ) {
                    Some(self.exram[(addr & 0x3FF) as usize])
                } else {
                    Some(0)
                }
            }
            3 => match kind {
                NametableKind::Attribute => Some(self.fill_attr),
                _ => Some(self.fill_tile),
            },
            _ => None, // CIRAM; the PPU resolves through `mirroring()`
        }
    }

    fn write_nametable(&mut self, addr: u16, data: u8) -> bool {
        if self.nametable_select(addr) == 2 {
            if self.exram_mode != ExRamMode::CpuRamReadOnly {
                self.exram[(addr & 0x3FF) as usize] = data;
            }
            return true;
        }
        false
    }

    fn extended_attribute(&self, coarse_x: u8, coarse_y: u8) -> Option<u8> {
        if self.exram_mode != ExRamMode::ExtendedAttributes {
            return None;
        }
        let index = (coarse_y as usize & 0x1F) * 32 + (coarse_x as usize & 0x1F);
        let byte = self.exram[index % EXRAM_SIZE];
        // Bits 6-7 carry the palette; expand to a standard attribute byte.
        let bits = byte >> 6;
        Some(bits | (bits << 2) | (bits << 4) | (bits << 6))
    }

    fn clock_audio(&mut self) {
        for pulse in self.pulses.iter_mut() {
            pulse.clock_timer();
        }
        // Quarter/half sequencer approximated at the APU's NTSC rates.
        self.audio_divider += 1;
        if self.audio_divider >= 7457 {
            self.audio_divider = 0;
            for pulse in self.pulses.iter_mut() {
                pulse.clock_quarter();
            }
            self.audio_step = (self.audio_step + 1) & 3;
            if self.audio_step & 1 == 1 {
                for pulse in self.pulses.iter_mut() {
                    pulse.clock_half();
                }
            }
        }
    }

    fn audio_sample(&self) -> f32 {
        let pulses = (self.pulses[0].output() + self.pulses[1].output()) as f32;
        // Same scale as the APU square table's linear region, plus the
        // 8-bit PCM level.
        pulses * 0.011 + self.pcm_level as f32 * 0.002
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
        5
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("MMC5")
    }

    fn save_state(&self) -> MapperState {
        MapperState::Mmc5(Box::new(Mmc5State {
            prg_mode: self.prg_mode,
            chr_mode: self.chr_mode,
            ram_protect: self.ram_protect,
            exram_mode: self.exram_mode.bits(),
            nametable_map: self.nametable_map,
            fill_tile: self.fill_tile,
            fill_attr: self.fill_attr,
            prg_ram_bank: self.prg_ram_bank,
            prg_regs: self.prg_regs,
            chr_regs_a: self.chr_regs_a,
            chr_regs_b: self.chr_regs_b,
            last_chr_set_b: self.last_chr_set_b,
            split_control: self.split_control,
            split_scroll: self.split_scroll,
            split_bank: self.split_bank,
            irq_compare: self.irq_compare,
            irq_enabled: self.irq_enabled,
            irq_pending: self.irq_pending,
            in_frame: self.in_frame,
            current_line: self.current_line,
            tile_fetch: self.tile_fetch,
            multiplicand: self.multiplicand,
            multiplier: self.multiplier,
            timer_counter: self.timer_counter,
            timer_running: self.timer_running,
            timer_pending: self.timer_pending,
            sprite_size_16: self.sprite_size_16,
            pulses: [self.pulses[0], self.pulses[1]],
            pcm_level: self.pcm_level,
            exram: self.exram.to_vec(),
        }))
    }

    fn load_state(&mut self, state: &MapperState) {
        if let MapperState::Mmc5(s) = state {
            self.prg_mode = s.prg_mode;
            self.chr_mode = s.chr_mode;
            self.ram_protect = s.ram_protect;
            self.exram_mode = ExRamMode::from_bits(s.exram_mode);
            self.nametable_map = s.nametable_map;
            self.fill_tile = s.fill_tile;
            self.fill_attr = s.fill_attr;
            self.prg_ram_bank = s.prg_ram_bank;
            self.prg_regs = s.prg_regs;
            self.chr_regs_a = s.chr_regs_a;
            self.chr_regs_b = s.chr_regs_b;
            self.last_chr_set_b = s.last_chr_set_b;
            self.split_control = s.split_control;
            self.split_scroll = s.split_scroll;
            self.split_bank = s.split_bank;
            self.irq_compare = s.irq_compare;
            self.irq_enabled = s.irq_enabled;
            self.irq_pending = s.irq_pending;
            self.in_frame = s.in_frame;
            self.current_line = s.current_line;
            self.tile_fetch = s.tile_fetch;
            self.multiplicand = s.multiplicand;
            self.multiplier = s.multiplier;
            self.timer_counter = s.timer_counter;
            self.timer_running = s.timer_running;
            self.timer_pending = s.timer_pending;
            self.sprite_size_16 = s.sprite_size_16;
            self.pulses = [s.pulses[0], s.pulses[1]];
            self.pcm_level = s.pcm_level;
            if self.exram.len() == s.exram.len() {
                self.exram.copy_from_slice(&s.exram);
            }
            self.apply_prg();
            self.apply_chr();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::header::RomFormat;

    fn board() -> Mmc5 {
        let prg: Vec<u8> = (0..64u8).flat_map(|b| vec![b; 8 * 1024]).collect();
        let chr: Vec<u8> = (0..128u8).flat_map(|b| vec![b; 1024]).collect();
        let header = Header {
            format: RomFormat::INes,
            mapper: 5,
            mirroring: Mirroring::Horizontal,
            battery_backed_ram: true,
            trainer_present: false,
            prg_rom_size: prg.len(),
            chr_rom_size: chr.len(),
            chr_ram_size: 0,
            prg_ram_size: 64 * 1024,
        };
        Mmc5::new(&header, prg, chr, None)
    }

    #[test]
    fn powers_on_with_last_bank_everywhere() {
        let mut mmc5 = board();
        // $5117 = 0xFF -> last bank in mode 3.
        assert_eq!(mmc5.cpu_read(0xE000), Some(63));
    }

    #[test]
    fn prg_mode_0_maps_32k() {
        let mut mmc5 = board();
        mmc5.cpu_write(0x5100, 0, 0);
        mmc5.cpu_write(0x5117, 0x87, 0); // 32K bank 1
        assert_eq!(mmc5.cpu_read(0x8000), Some(4));
        assert_eq!(mmc5.cpu_read(0xE000), Some(7));
    }

    #[test]
    fn ram_slot_requires_protect_pattern() {
        let mut mmc5 = board();
        mmc5.cpu_write(0x5100, 3, 0);
        mmc5.cpu_write(0x5114, 0x00, 0); // RAM bank 0 at $8000
        mmc5.cpu_write(0x8000, 0x42, 0);
        assert_eq!(mmc5.cpu_read(0x8000), Some(0x00));
        mmc5.cpu_write(0x5102, 0x02, 0);
        mmc5.cpu_write(0x5103, 0x01, 0);
        mmc5.cpu_write(0x8000, 0x42, 0);
        assert_eq!(mmc5.cpu_read(0x8000), Some(0x42));
    }

    #[test]
    fn multiplier_products_read_back() {
        let mut mmc5 = board();
        mmc5.cpu_write(0x5205, 12, 0);
        mmc5.cpu_write(0x5206, 34, 0);
        let lo = mmc5.cpu_read(0x5205).unwrap() as u16;
        let hi = mmc5.cpu_read(0x5206).unwrap() as u16;
        assert_eq!((hi << 8) | lo, 12 * 34);
    }

    #[test]
    fn fill_mode_supplies_tile_and_attribute() {
        let mut mmc5 = board();
        mmc5.cpu_write(0x5105, 0xFF, 0); // all nametables in fill mode
        mmc5.cpu_write(0x5106, 0xAB, 0);
        mmc5.cpu_write(0x5107, 0x02, 0);
        assert_eq!(
            mmc5.read_nametable(0x2000, NametableKind::Tile),
            Some(0xAB)
        );
        assert_eq!(
            mmc5.read_nametable(0x23C0, NametableKind::Attribute),
            Some(0xAA)
        );
    }

    #[test]
    fn exram_nametable_and_cpu_modes() {
        let mut mmc5 = board();
        mmc5.cpu_write(0x5105, 0xAA, 0); // all four nametables -> ExRAM
        mmc5.write_nametable(0x2005, 0x5A);
        assert_eq!(
            mmc5.read_nametable(0x2005, NametableKind::Cpu),
            Some(0x5A)
        );
        // CPU window requires RAM mode.
        assert_eq!(mmc5.cpu_read(0x5C05), None);
        mmc5.cpu_write(0x5104, 0x02, 0);
        assert_eq!(mmc5.cpu_read(0x5C05), Some(0x5A));
    }

    #[test]
    fn extended_attributes_expand_palette_bits() {
        let mut mmc5 = board();
        mmc5.cpu_write(0x5104, 0x01, 0);
        mmc5.exram[33] = 0b1000_0000; // tile (1,1), palette bits 10
        assert_eq!(mmc5.extended_attribute(1, 1), Some(0b1010_1010));
    }

    #[test]
    fn scanline_compare_raises_irq() {
        let mut mmc5 = board();
        mmc5.cpu_write(0x5203, 30, 0);
        mmc5.cpu_write(0x5204, 0x80, 0);
        mmc5.end_scanline(0);
        assert!(!mmc5.irq_pending());
        mmc5.end_scanline(30);
        assert!(mmc5.irq_pending());
        // Status read acknowledges.
        let status = mmc5.cpu_read(0x5204).unwrap();
        assert_eq!(status & 0x80, 0x80);
        assert!(!mmc5.irq_pending());
    }

    #[test]
    fn timer_counts_cpu_cycles() {
        let mut mmc5 = board();
        mmc5.cpu_write(0x5209, 10, 0);
        mmc5.cpu_clock(9);
        assert!(!mmc5.irq_pending());
        mmc5.cpu_clock(1);
        assert!(mmc5.irq_pending());
        assert_eq!(mmc5.cpu_read(0x5209), Some(0x80));
        assert!(!mmc5.irq_pending());
    }

    #[test]
    fn background_and_sprite_sets_diverge_in_8x16() {
        let mut mmc5 = board();
        mmc5.cpu_write(0x5101, 3, 0);
        mmc5.ppu_register_write(0x2000, 0x20); // 8x16 sprites
        mmc5.cpu_write(0x5120, 10, 0); // sprite set slot 0
        mmc5.cpu_write(0x5128, 20, 0); // background set slot 0
        assert_eq!(mmc5.ppu_read(0x0000, PpuFetchKind::Sprite), Some(10));
        assert_eq!(mmc5.ppu_read(0x0000, PpuFetchKind::Background), Some(20));
    }
}
