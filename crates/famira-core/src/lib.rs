//! famira-core: a cycle-accurate NES emulator core.
//!
//! The [`Console`] owns one CPU, PPU, APU, cartridge session, and two
//! controller ports, and is their sole scheduler: everything runs on one
//! logical clock with no suspension points. For a given ROM, RAM-init
//! pattern, and input trace the emitted frames and audio samples are
//! bit-for-bit deterministic.
//!
//! Per frame the console loops: one CPU instruction, the same number of
//! APU cycles, three PPU dots per CPU cycle (minus whatever the
//! mid-instruction catch-up in [`bus`] already consumed), and the mapper's
//! CPU-cycle hook. The frame ends when the PPU completes scanline 261.

use tracing::warn;

use crate::apu::Apu;
use crate::bus::CpuBus;
use crate::cartridge::Cartridge;
use crate::config::{ConsoleConfig, RamInit};
use crate::controller::{Button, ControllerPorts};
use crate::cpu::{Cpu, CpuSnapshot};
use crate::error::Error;
use crate::memory::cpu as cpu_mem;
use crate::ppu::Ppu;
use crate::reset_kind::ResetKind;

pub mod apu;
pub mod bus;
pub mod cartridge;
pub mod config;
pub mod controller;
pub mod cpu;
pub mod error;
pub mod memory;
pub mod ppu;
pub mod reset_kind;
pub mod state;

pub use apu::PanSettings;
pub use config::RamInit as RamInitPattern;

/// The whole machine. Single-threaded and cooperative; hosts drive it
/// through [`Console::run_frame`] from their frame pump.
#[derive(Debug)]
pub struct Console {
    pub(crate) cpu: Cpu,
    pub(crate) ppu: Ppu,
    pub(crate) apu: Apu,
    pub(crate) ram: Box<[u8; cpu_mem::RAM_SIZE]>,
    pub(crate) cartridge: Option<Cartridge>,
    pub(crate) controllers: ControllerPorts,
    pub(crate) config: ConsoleConfig,
    /// Instructions retired since power-on; feeds mapper write filtering.
    pub(crate) instr_count: u64,
    /// CPU cycles retired since power-on.
    pub(crate) cycles: u64,
    stop_requested: bool,
}

/// Builder mirroring the configurable options of [`ConsoleConfig`].
#[derive(Debug, Default)]
pub struct ConsoleBuilder {
    config: ConsoleConfig,
}

impl ConsoleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    pub fn preferred_frame_rate(mut self, fps: u32) -> Self {
        self.config.preferred_frame_rate = fps;
        self
    }

    pub fn emulate_sound(mut self, enabled: bool) -> Self {
        self.config.emulate_sound = enabled;
        self
    }

    pub fn ram_init(mut self, pattern: RamInit) -> Self {
        self.config.ram_init = pattern;
        self
    }

    pub fn build(self) -> Console {
        let mut console = Console {
            cpu: Cpu::new(),
            ppu: Ppu::new(),
            apu: Apu::new(),
            ram: Box::new([0; cpu_mem::RAM_SIZE]),
            cartridge: None,
            controllers: ControllerPorts::default(),
            config: self.config,
            instr_count: 0,
            cycles: 0,
            stop_requested: false,
        };
        console
            .apu
            .configure_rates(self.config.sample_rate, self.config.preferred_frame_rate);
        console
    }
}

macro_rules! console_bus {
    ($console:ident) => {
        CpuBus::new(
            &mut *$console.ram,
            &mut $console.ppu,
            &mut $console.apu,
            $console.cartridge.as_mut(),
            &mut $console.controllers,
            $console.instr_count,
            $console.cycles,
        )
    };
}

impl Console {
    pub fn builder() -> ConsoleBuilder {
        ConsoleBuilder::new()
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Parses and inserts a cartridge, then performs a full power cycle.
    ///
    /// Fails without touching console state when the image is malformed.
    pub fn load_rom(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let cartridge = Cartridge::new(bytes)?;
        self.cartridge = Some(cartridge);
        self.power_on();
        Ok(())
    }

    pub fn eject(&mut self) {
        self.cartridge = None;
    }

    pub fn power_on(&mut self) {
        self.reset(ResetKind::PowerOn);
    }

    /// The console's reset button.
    pub fn reset_button(&mut self) {
        self.reset(ResetKind::Soft);
    }

    fn reset(&mut self, kind: ResetKind) {
        if matches!(kind, ResetKind::PowerOn) {
            self.config.ram_init.fill(&mut self.ram[..]);
            self.instr_count = 0;
            self.cycles = 0;
        }
        self.ppu.reset(kind);
        self.apu.reset(kind);
        self.apu
            .configure_rates(self.config.sample_rate, self.config.preferred_frame_rate);
        if let Some(cart) = self.cartridge.as_mut() {
            cart.reset(kind);
            if matches!(kind, ResetKind::PowerOn) {
                if let Some(ram) = cart.mapper_mut().prg_ram_mut() {
                    self.config.ram_init.fill(ram);
                }
            }
        }
        self.stop_requested = false;

        let mut bus = console_bus!(self);
        self.cpu.reset(&mut bus, kind);
    }

    /// Executes one instruction plus its APU/PPU/mapper companions.
    pub fn step_instruction(&mut self) {
        let mut bus = console_bus!(self);
        let executed = self.cpu.step(&mut bus);
        if self.config.emulate_sound {
            bus.run_apu(&mut self.cpu, executed);
        }
        bus.end_instruction();
        let total = bus.cycles_this_instr();
        drop(bus);

        self.cycles += total as u64;
        self.instr_count += 1;
    }

    /// Runs emulation until the PPU signals end-of-frame (or a stop
    /// request lands between instructions), then returns the frame's
    /// interleaved stereo audio.
    pub fn run_frame(&mut self) -> Vec<f32> {
        self.ppu.start_frame();
        while !self.ppu.frame_complete() {
            if self.stop_requested {
                self.stop_requested = false;
                break;
            }
            self.step_instruction();
        }
        self.apu.drain_samples()
    }

    /// Requests `run_frame` to bail out at the next instruction boundary.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    // ---- host I/O --------------------------------------------------------

    /// 256x240 row-major 24-bit RGB, R in the high byte.
    pub fn framebuffer(&self) -> &[u8] {
        self.ppu.framebuffer()
    }

    pub fn frame_count(&self) -> u64 {
        self.ppu.frame_count()
    }

    /// PPU dots executed by the most recently completed frame.
    pub fn last_frame_dots(&self) -> u32 {
        self.ppu.last_frame_dots()
    }

    pub fn button_down(&mut self, pad: usize, button: Button) {
        if let Some(controller) = self.controllers.pad_mut(pad) {
            controller.set_button(button, true);
        }
    }

    pub fn button_up(&mut self, pad: usize, button: Button) {
        if let Some(controller) = self.controllers.pad_mut(pad) {
            controller.set_button(button, false);
        }
    }

    pub fn zapper_move(&mut self, x: i32, y: i32) {
        self.controllers.zapper.set_position(x, y);
    }

    pub fn zapper_fire_down(&mut self) {
        self.controllers.zapper.set_trigger(true);
    }

    pub fn zapper_fire_up(&mut self) {
        self.controllers.zapper.set_trigger(false);
    }

    pub fn set_pan(&mut self, pan: PanSettings) {
        self.apu.set_pan(pan);
    }

    /// Reconfigures host rates; the APU recomputes its resampler ratio.
    pub fn set_rates(&mut self, sample_rate: u32, preferred_frame_rate: u32) {
        self.config.sample_rate = sample_rate;
        self.config.preferred_frame_rate = preferred_frame_rate;
        self.apu.configure_rates(sample_rate, preferred_frame_rate);
    }

    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.cartridge.as_ref()
    }

    /// Battery-backed save RAM for host persistence, when present.
    pub fn battery_ram(&self) -> Option<&[u8]> {
        self.cartridge.as_ref()?.mapper().prg_save_ram()
    }

    pub fn load_battery_ram(&mut self, data: &[u8]) {
        if let Some(ram) = self
            .cartridge
            .as_mut()
            .and_then(|cart| cart.mapper_mut().prg_save_ram_mut())
        {
            let len = ram.len().min(data.len());
            ram[..len].copy_from_slice(&data[..len]);
            if len < data.len() {
                warn!(
                    expected = ram.len(),
                    got = data.len(),
                    "battery RAM size mismatch, truncated"
                );
            }
        }
    }

    /// Debug read without register side effects: RAM and cartridge space
    /// only, everything else reports the open-bus latch.
    pub fn peek_cpu(&mut self, addr: u16) -> u8 {
        match addr {
            0..=cpu_mem::RAM_END => self.ram[(addr & cpu_mem::RAM_MIRROR_MASK) as usize],
            cpu_mem::PRG_RAM_START..=cpu_mem::CPU_ADDR_END => self
                .cartridge
                .as_mut()
                .and_then(|cart| cart.mapper_mut().cpu_read(addr))
                .unwrap_or(self.cpu.open_bus),
            _ => self.cpu.open_bus,
        }
    }

    /// Register snapshot for tracing and tests.
    pub fn cpu_snapshot(&self) -> CpuSnapshot {
        self.cpu.snapshot()
    }

    /// Last byte observed on the CPU data bus.
    pub fn open_bus(&self) -> u8 {
        self.cpu.open_bus
    }

    /// CPU cycles retired since power-on.
    pub fn cpu_cycles(&self) -> u64 {
        self.cycles
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
