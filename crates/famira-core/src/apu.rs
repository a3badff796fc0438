//! Audio Processing Unit.
//!
//! Five channels, the frame sequencer, a non-linear mixer, and an
//! accumulator resampler that emits interleaved stereo samples at the host
//! rate. The APU advances one CPU cycle per [`Apu::step`] call; the only
//! readable register is `$4015`, so every other read declines and the CPU
//! substitutes its open-bus latch.

mod dmc;
mod envelope;
mod frame_counter;
mod length_counter;
mod mixer;
mod noise;
mod pulse;
mod tables;
mod triangle;

use serde::{Deserialize, Serialize};

use crate::memory::apu as apu_mem;
use crate::reset_kind::ResetKind;

pub use dmc::DmcFetch;
pub use mixer::PanSettings;

use dmc::Dmc;
use frame_counter::FrameCounter;
use mixer::{ChannelLevels, Mixer};
use noise::Noise;
use pulse::{Pulse, PulseChannel};
use triangle::Triangle;

/// NTSC CPU clock in Hz.
pub const CPU_CLOCK_NTSC: f64 = 1_789_773.0;
/// Exact NTSC frame rate the hardware produces.
pub const NTSC_FPS: f64 = 60.0988;

impl Default for Mixer {
    fn default() -> Self {
        Mixer::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Apu {
    pulse1: Pulse,
    pulse2: Pulse,
    triangle: Triangle,
    noise: Noise,
    dmc: Dmc,
    frame_counter: FrameCounter,
    frame_irq: bool,
    /// CPU cycles since power-on; parity picks the $4017 write delay.
    cycles: u64,

    sample_rate: u32,
    preferred_frame_rate: u32,
    cycles_per_sample: f64,
    resample_acc: f64,

    #[serde(skip)]
    mixer: Mixer,
    /// Interleaved stereo output, drained once per frame by the console.
    #[serde(skip)]
    samples: Vec<f32>,
}

impl Apu {
    pub fn new() -> Self {
        let mut apu = Self {
            pulse1: Pulse::new(PulseChannel::Pulse1),
            pulse2: Pulse::new(PulseChannel::Pulse2),
            triangle: Triangle::default(),
            noise: Noise::default(),
            dmc: Dmc::default(),
            frame_counter: FrameCounter::default(),
            frame_irq: false,
            cycles: 0,
            sample_rate: 48_000,
            preferred_frame_rate: 60,
            cycles_per_sample: 0.0,
            resample_acc: 0.0,
            mixer: Mixer::new(),
            samples: Vec::new(),
        };
        apu.recompute_resampler();
        apu
    }

    /// Updates the resampler ratio from host sample rate and frame pump
    /// target. Running the pump at an integer FPS slightly stretches time
    /// relative to the hardware's 60.0988 Hz; folding the ratio in here
    /// keeps the audio stream gap-free.
    pub fn configure_rates(&mut self, sample_rate: u32, preferred_frame_rate: u32) {
        self.sample_rate = sample_rate.max(1);
        self.preferred_frame_rate = preferred_frame_rate.max(1);
        self.recompute_resampler();
    }

    fn recompute_resampler(&mut self) {
        let cycles_per_frame = CPU_CLOCK_NTSC / NTSC_FPS;
        let samples_per_frame = self.sample_rate as f64 / self.preferred_frame_rate as f64;
        self.cycles_per_sample = cycles_per_frame / samples_per_frame;
    }

    pub fn reset(&mut self, kind: ResetKind) {
        if matches!(kind, ResetKind::PowerOn) {
            self.pulse1 = Pulse::new(PulseChannel::Pulse1);
            self.pulse2 = Pulse::new(PulseChannel::Pulse2);
            self.triangle = Triangle::default();
            self.noise = Noise::default();
            self.dmc = Dmc::default();
            self.cycles = 0;
        } else {
            // A soft reset silences the channels but keeps the DAC state.
            self.pulse1.length.set_enabled(false);
            self.pulse2.length.set_enabled(false);
            self.triangle.length.set_enabled(false);
            self.noise.length.set_enabled(false);
            self.dmc.set_enabled(false);
        }
        self.frame_counter = FrameCounter::default();
        self.frame_irq = false;
        self.resample_acc = 0.0;
        self.mixer.reset();
        self.samples.clear();
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycles
    }

    pub fn irq_pending(&self) -> bool {
        self.frame_irq || self.dmc.irq_pending
    }

    pub fn set_pan(&mut self, pan: PanSettings) {
        self.mixer.pan = pan;
    }

    /// Only `$4015` reads back; everything else is open bus.
    pub fn cpu_read(&mut self, addr: u16) -> Option<u8> {
        if addr != apu_mem::STATUS {
            return None;
        }
        let mut status = 0u8;
        if self.pulse1.active() {
            status |= 0x01;
        }
        if self.pulse2.active() {
            status |= 0x02;
        }
        if self.triangle.active() {
            status |= 0x04;
        }
        if self.noise.active() {
            status |= 0x08;
        }
        if self.dmc.active() {
            status |= 0x10;
        }
        if self.frame_irq {
            status |= 0x40;
        }
        if self.dmc.irq_pending {
            status |= 0x80;
        }
        self.frame_irq = false;
        Some(status)
    }

    pub fn cpu_write(&mut self, addr: u16, value: u8) {
        match addr {
            0x4000 => self.pulse1.write_control(value),
            0x4001 => self.pulse1.write_sweep(value),
            0x4002 => self.pulse1.write_timer_low(value),
            0x4003 => self.pulse1.write_timer_high(value),
            0x4004 => self.pulse2.write_control(value),
            0x4005 => self.pulse2.write_sweep(value),
            0x4006 => self.pulse2.write_timer_low(value),
            0x4007 => self.pulse2.write_timer_high(value),
            0x4008 => self.triangle.write_linear(value),
            0x400A => self.triangle.write_timer_low(value),
            0x400B => self.triangle.write_timer_high(value),
            0x400C => self.noise.write_control(value),
            0x400E => self.noise.write_period(value),
            0x400F => self.noise.write_length(value),
            0x4010 => self.dmc.write_control(value),
            0x4011 => self.dmc.write_direct_load(value),
            0x4012 => self.dmc.write_sample_address(value),
            0x4013 => self.dmc.write_sample_length(value),
            apu_mem::STATUS => {
                self.pulse1.length.set_enabled(value & 0x01 != 0);
                self.pulse2.length.set_enabled(value & 0x02 != 0);
                self.triangle.length.set_enabled(value & 0x04 != 0);
                self.noise.length.set_enabled(value & 0x08 != 0);
                self.dmc.set_enabled(value & 0x10 != 0);
                self.dmc.irq_pending = false;
            }
            apu_mem::FRAME_COUNTER => {
                self.frame_counter.write(value, self.cycles & 1 == 1);
                if value & 0x40 != 0 {
                    self.frame_irq = false;
                }
            }
            _ => {}
        }
    }

    /// Advances one CPU cycle. `expansion` is the cartridge audio sample
    /// for this cycle, already clocked by the caller. Returns a DMC fetch
    /// request for the bus to service when the sample buffer runs dry.
    pub fn step(&mut self, expansion: f32) -> Option<DmcFetch> {
        self.cycles = self.cycles.wrapping_add(1);

        let tick = self.frame_counter.clock();
        if tick.quarter {
            self.pulse1.clock_quarter();
            self.pulse2.clock_quarter();
            self.triangle.clock_quarter();
            self.noise.clock_quarter();
        }
        if tick.half {
            self.pulse1.clock_half();
            self.pulse2.clock_half();
            self.triangle.clock_half();
            self.noise.clock_half();
        }
        if tick.frame_irq {
            self.frame_irq = true;
        }

        self.pulse1.clock_timer();
        self.pulse2.clock_timer();
        self.triangle.clock_timer();
        self.noise.clock_timer();
        let fetch = self.dmc.clock_timer();

        // Accumulator resampler: one output sample every
        // `cycles_per_sample` CPU cycles.
        self.resample_acc += 1.0;
        if self.resample_acc >= self.cycles_per_sample {
            self.resample_acc -= self.cycles_per_sample;
            let levels = ChannelLevels {
                pulse1: self.pulse1.output(),
                pulse2: self.pulse2.output(),
                triangle: self.triangle.output(),
                noise: self.noise.output(),
                dmc: self.dmc.output(),
                expansion,
            };
            let (left, right) = self.mixer.mix(levels);
            self.samples.push(left);
            self.samples.push(right);
        }

        fetch
    }

    /// Delivers the byte the bus fetched for the DMC.
    pub fn finish_dma_fetch(&mut self, byte: u8) {
        self.dmc.finish_fetch(byte);
    }

    /// Hands the frame's interleaved stereo samples to the caller.
    pub fn drain_samples(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.samples)
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_status_register_reads_back() {
        let mut apu = Apu::new();
        assert_eq!(apu.cpu_read(0x4000), None);
        assert_eq!(apu.cpu_read(0x4017), None);
        assert!(apu.cpu_read(0x4015).is_some());
    }

    #[test]
    fn status_reports_active_channels() {
        let mut apu = Apu::new();
        apu.cpu_write(0x4015, 0x01);
        apu.cpu_write(0x4003, 0x08); // load pulse1 length
        assert_eq!(apu.cpu_read(0x4015).unwrap() & 0x01, 0x01);
        // Disabling clears the length counter immediately.
        apu.cpu_write(0x4015, 0x00);
        assert_eq!(apu.cpu_read(0x4015).unwrap() & 0x01, 0x00);
    }

    #[test]
    fn frame_irq_sets_and_clears_on_status_read() {
        let mut apu = Apu::new();
        for _ in 0..29_830 {
            apu.step(0.0);
        }
        let status = apu.cpu_read(0x4015).unwrap();
        assert_eq!(status & 0x40, 0x40);
        let status = apu.cpu_read(0x4015).unwrap();
        assert_eq!(status & 0x40, 0x00);
    }

    #[test]
    fn resampler_emits_roughly_sample_rate_over_a_second() {
        let mut apu = Apu::new();
        apu.configure_rates(48_000, 60);
        for _ in 0..(CPU_CLOCK_NTSC as u64) {
            apu.step(0.0);
        }
        let frames = apu.drain_samples().len() / 2;
        // One emulated second at a 60 Hz pump stretches slightly past
        // 48000 host samples (60.0988/60).
        let expected = 48_000.0 * NTSC_FPS / 60.0;
        assert!((frames as f64 - expected).abs() < 50.0);
    }

    #[test]
    fn dmc_requests_fetch_when_enabled() {
        let mut apu = Apu::new();
        apu.cpu_write(0x4012, 0x00); // sample at $C000
        apu.cpu_write(0x4013, 0x01); // 17 bytes
        apu.cpu_write(0x4015, 0x10);
        let mut fetch = None;
        for _ in 0..10 {
            fetch = apu.step(0.0);
            if fetch.is_some() {
                break;
            }
        }
        let fetch = fetch.expect("DMC should request its first byte");
        assert_eq!(fetch.addr, 0xC000);
        apu.finish_dma_fetch(0x7F);
        assert!(apu.cpu_read(0x4015).unwrap() & 0x10 != 0);
    }
}
