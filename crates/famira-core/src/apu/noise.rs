//! Noise channel: 15-bit linear-feedback shift register.

use serde::{Deserialize, Serialize};

use super::envelope::Envelope;
use super::length_counter::LengthCounter;
use super::tables::NOISE_PERIOD_TABLE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct Noise {
    timer: u16,
    timer_period: u16,
    /// LFSR state, never zero; hardware powers up with 1.
    shift: u16,
    /// Mode 1 taps bit 6 instead of bit 1, giving the short 93-step cycle.
    mode: bool,
    pub(super) envelope: Envelope,
    pub(super) length: LengthCounter,
}

impl Default for Noise {
    fn default() -> Self {
        Self {
            timer: 0,
            timer_period: NOISE_PERIOD_TABLE[0],
            shift: 1,
            mode: false,
            envelope: Envelope::default(),
            length: LengthCounter::default(),
        }
    }
}

impl Noise {
    pub(super) fn write_control(&mut self, value: u8) {
        self.envelope.configure(value);
    }

    pub(super) fn write_period(&mut self, value: u8) {
        self.mode = value & 0x80 != 0;
        self.timer_period = NOISE_PERIOD_TABLE[(value & 0x0F) as usize];
    }

    pub(super) fn write_length(&mut self, value: u8) {
        self.length.load(value >> 3);
        self.envelope.restart();
    }

    pub(super) fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.timer_period;
            self.step_lfsr();
        } else {
            self.timer -= 1;
        }
    }

    fn step_lfsr(&mut self) {
        let tap = if self.mode { 6 } else { 1 };
        let feedback = (self.shift & 1) ^ ((self.shift >> tap) & 1);
        self.shift >>= 1;
        self.shift |= feedback << 14;
    }

    pub(super) fn clock_quarter(&mut self) {
        self.envelope.clock();
    }

    pub(super) fn clock_half(&mut self) {
        self.length.clock(self.envelope.halt_length());
    }

    pub(super) fn output(&self) -> u8 {
        if !self.length.active() || self.shift & 1 != 0 {
            0
        } else {
            self.envelope.output()
        }
    }

    pub(super) fn active(&self) -> bool {
        self.length.active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lfsr_period(mode: bool) -> u64 {
        let mut noise = Noise {
            mode,
            ..Noise::default()
        };
        let initial = noise.shift;
        let mut steps = 0u64;
        loop {
            noise.step_lfsr();
            steps += 1;
            if noise.shift == initial {
                return steps;
            }
            assert!(steps < 100_000);
        }
    }

    #[test]
    fn long_mode_period_is_32767() {
        assert_eq!(lfsr_period(false), 32_767);
    }

    #[test]
    fn short_mode_period_is_93() {
        assert_eq!(lfsr_period(true), 93);
    }
}
