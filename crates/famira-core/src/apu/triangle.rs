//! Triangle channel: linear counter plus length counter gating a 32-step
//! sequence.

use serde::{Deserialize, Serialize};

use super::length_counter::LengthCounter;
use super::tables::TRIANGLE_SEQUENCE;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct Triangle {
    timer: u16,
    timer_period: u16,
    sequence_pos: u8,
    linear_counter: u8,
    linear_reload_value: u8,
    linear_reload: bool,
    /// Control flag: halts the length counter and keeps the reload flag.
    control: bool,
    pub(super) length: LengthCounter,
}

impl Triangle {
    pub(super) fn write_linear(&mut self, value: u8) {
        self.control = value & 0x80 != 0;
        self.linear_reload_value = value & 0x7F;
    }

    pub(super) fn write_timer_low(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0x0700) | value as u16;
    }

    pub(super) fn write_timer_high(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0x00FF) | (((value & 0x07) as u16) << 8);
        self.length.load(value >> 3);
        self.linear_reload = true;
    }

    /// CPU-cycle tick; the sequencer advances every `period + 1` cycles and
    /// only while both counters are live.
    pub(super) fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.timer_period;
            if self.length.active() && self.linear_counter > 0 {
                self.sequence_pos = (self.sequence_pos + 1) & 0x1F;
            }
        } else {
            self.timer -= 1;
        }
    }

    pub(super) fn clock_quarter(&mut self) {
        if self.linear_reload {
            self.linear_counter = self.linear_reload_value;
        } else if self.linear_counter > 0 {
            self.linear_counter -= 1;
        }
        if !self.control {
            self.linear_reload = false;
        }
    }

    pub(super) fn clock_half(&mut self) {
        self.length.clock(self.control);
    }

    /// When gated the sequencer freezes rather than dropping to zero, so
    /// the DAC holds its last level instead of popping.
    pub(super) fn output(&self) -> u8 {
        TRIANGLE_SEQUENCE[self.sequence_pos as usize]
    }

    pub(super) fn active(&self) -> bool {
        self.length.active()
    }
}
