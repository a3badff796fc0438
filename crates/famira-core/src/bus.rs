//! CPU-side bus and the CPU/PPU catch-up synchronizer.
//!
//! A `CpuBus` is a borrow view over the console's components, built fresh
//! for each instruction (the same pattern the PPU uses for its mapper
//! access). Before any access that could observe PPU-coupled state, the
//! bus advances the PPU one dot at a time to `3 x` the CPU cycles already
//! consumed by the in-flight instruction, clocking the mapper once per
//! three dots. It tracks how much it pre-consumed so the post-instruction
//! drain never double-counts.

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::controller::ControllerPorts;
use crate::cpu::Cpu;
use crate::memory::{cpu as cpu_mem, input, ppu as ppu_mem};
use crate::ppu::{MapperBus, Ppu};

pub(crate) struct CpuBus<'a> {
    pub(crate) ram: &'a mut [u8; cpu_mem::RAM_SIZE],
    pub(crate) ppu: &'a mut Ppu,
    pub(crate) apu: &'a mut Apu,
    pub(crate) cartridge: Option<&'a mut Cartridge>,
    pub(crate) controllers: &'a mut ControllerPorts,
    /// Console instruction counter, fed to mapper writes so boards can
    /// reject repeat writes from one read-modify-write instruction.
    pub(crate) instr_count: u64,
    /// CPU cycles completed before this instruction began.
    pub(crate) cycles_base: u64,

    instr_cycles: u32,
    dots_consumed: u32,
    pending_oam_dma: Option<u8>,
}

impl<'a> CpuBus<'a> {
    pub(crate) fn new(
        ram: &'a mut [u8; cpu_mem::RAM_SIZE],
        ppu: &'a mut Ppu,
        apu: &'a mut Apu,
        cartridge: Option<&'a mut Cartridge>,
        controllers: &'a mut ControllerPorts,
        instr_count: u64,
        cycles_base: u64,
    ) -> Self {
        Self {
            ram,
            ppu,
            apu,
            cartridge,
            controllers,
            instr_count,
            cycles_base,
            instr_cycles: 0,
            dots_consumed: 0,
            pending_oam_dma: None,
        }
    }

    pub(crate) fn begin_instruction(&mut self) {
        self.instr_cycles = 0;
        self.dots_consumed = 0;
    }

    pub(crate) fn cycles_this_instr(&self) -> u32 {
        self.instr_cycles
    }

    pub(crate) fn total_cycles(&self) -> u64 {
        self.cycles_base + self.instr_cycles as u64
    }

    /// Internal CPU cycle with no device access.
    pub(crate) fn tick(&mut self) {
        self.instr_cycles += 1;
    }

    pub(crate) fn take_oam_dma(&mut self) -> Option<u8> {
        self.pending_oam_dma.take()
    }

    pub(crate) fn take_nmi(&mut self) -> bool {
        self.ppu.take_nmi()
    }

    pub(crate) fn irq_level(&self) -> bool {
        let mapper_irq = self
            .cartridge
            .as_deref()
            .map(|cart| cart.mapper().irq_pending())
            .unwrap_or(false);
        mapper_irq || self.apu.irq_pending()
    }

    /// Addresses whose handling depends on sub-instruction PPU state.
    fn is_sensitive(addr: u16) -> bool {
        matches!(
            addr,
            ppu_mem::REGISTER_BASE..=ppu_mem::REGISTER_MIRROR_END
                | ppu_mem::OAM_DMA
                | input::JOY1
                | input::JOY2
        ) || addr >= cpu_mem::PRG_RAM_START
    }

    /// Advances the PPU to the exact intra-instruction offset, strictly
    /// interleaved one dot at a time, clocking the mapper every third dot.
    fn catch_up(&mut self) {
        let target = self.instr_cycles * 3;
        while self.dots_consumed < target {
            self.step_ppu_dot();
        }
    }

    fn step_ppu_dot(&mut self) {
        let mut mapper = MapperBus::new(self.cartridge.as_deref_mut());
        self.ppu.step(&mut mapper);
        self.dots_consumed += 1;
        if self.dots_consumed % 3 == 0 {
            self.clock_mapper(1);
        }
    }

    fn clock_mapper(&mut self, cycles: u32) {
        if let Some(cart) = self.cartridge.as_deref_mut() {
            if cart.mapper().capabilities().cpu_clock_hook {
                cart.mapper_mut().cpu_clock(cycles);
            }
        }
    }

    /// One CPU read cycle. Returns `None` when no device answers, letting
    /// the CPU substitute its open-bus latch.
    pub(crate) fn read(&mut self, addr: u16) -> Option<u8> {
        if Self::is_sensitive(addr) {
            self.catch_up();
        }
        let value = self.route_read(addr);
        self.instr_cycles += 1;
        value
    }

    fn route_read(&mut self, addr: u16) -> Option<u8> {
        match addr {
            0..=cpu_mem::RAM_END => {
                Some(self.ram[(addr & cpu_mem::RAM_MIRROR_MASK) as usize])
            }
            ppu_mem::REGISTER_BASE..=ppu_mem::REGISTER_MIRROR_END => {
                let mut mapper = MapperBus::new(self.cartridge.as_deref_mut());
                Some(self.ppu.cpu_read(addr, &mut mapper))
            }
            input::JOY1 => {
                // Bits 5-6 approximate open bus as a constant $40.
                Some(self.controllers.pads[0].read() | 0x40)
            }
            input::JOY2 => {
                if self.controllers.zapper.connected() {
                    Some(self.controllers.zapper.read(self.ppu))
                } else {
                    Some(self.controllers.pads[1].read() | 0x40)
                }
            }
            0x4000..=0x401F => {
                // $4015 is the only readable APU register.
                let apu_value = self.apu.cpu_read(addr);
                if apu_value.is_some() {
                    return apu_value;
                }
                self.cartridge
                    .as_deref_mut()
                    .and_then(|cart| cart.mapper_mut().cpu_read(addr))
            }
            _ => self
                .cartridge
                .as_deref_mut()
                .and_then(|cart| cart.mapper_mut().cpu_read(addr)),
        }
    }

    /// One CPU write cycle.
    pub(crate) fn write(&mut self, addr: u16, data: u8) {
        if Self::is_sensitive(addr) {
            self.catch_up();
        }
        self.route_write(addr, data);
        self.instr_cycles += 1;
    }

    fn route_write(&mut self, addr: u16, data: u8) {
        match addr {
            0..=cpu_mem::RAM_END => {
                self.ram[(addr & cpu_mem::RAM_MIRROR_MASK) as usize] = data;
            }
            ppu_mem::REGISTER_BASE..=ppu_mem::REGISTER_MIRROR_END => {
                let mut mapper = MapperBus::new(self.cartridge.as_deref_mut());
                self.ppu.cpu_write(addr, data, &mut mapper);
            }
            ppu_mem::OAM_DMA => {
                self.pending_oam_dma = Some(data);
            }
            input::JOY1 => self.controllers.write_strobe(data),
            0x4000..=0x4013 | 0x4015 | 0x4017 => self.apu.cpu_write(addr, data),
            _ => {
                if let Some(cart) = self.cartridge.as_deref_mut() {
                    cart.mapper_mut().cpu_write(addr, data, self.instr_count);
                }
            }
        }
    }

    /// Advances the APU by the instruction's cycles, servicing DMC fetches
    /// through the normal read path (each one stalls the CPU four cycles
    /// and lands on the open-bus latch). Expansion audio is clocked in
    /// lockstep. Returns the extra stall cycles consumed.
    pub(crate) fn run_apu(&mut self, cpu: &mut Cpu, cycles: u32) -> u32 {
        let mut remaining = cycles;
        let mut stall = 0u32;
        while remaining > 0 {
            remaining -= 1;

            let expansion = match self.cartridge.as_deref_mut() {
                Some(cart) if cart.mapper().capabilities().expansion_audio => {
                    cart.mapper_mut().clock_audio();
                    cart.mapper().audio_sample()
                }
                _ => 0.0,
            };

            if let Some(fetch) = self.apu.step(expansion) {
                // Four stolen cycles: three idle, one for the bus read.
                self.tick();
                self.tick();
                self.tick();
                let value = self.read(fetch.addr).unwrap_or(cpu.open_bus);
                cpu.open_bus = value;
                self.apu.finish_dma_fetch(value);
                remaining += 4;
                stall += 4;
            }
        }
        stall
    }

    /// Post-instruction drain: brings the PPU to exactly `3 x cycles` dots
    /// and the mapper to one clock per cycle, then retires the deferred
    /// controller shift.
    pub(crate) fn end_instruction(&mut self) {
        self.catch_up();
        self.controllers.end_instruction();
    }
}
