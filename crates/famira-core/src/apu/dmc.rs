//! Delta modulation channel.
//!
//! The DMC is the only channel that touches the CPU bus: every eight
//! shifted-out bits it asks for the next sample byte. The fetch is
//! surfaced to the bus as a [`DmcFetch`] request so the read goes through
//! the normal CPU path (updating the open-bus latch) and costs the
//! documented four stall cycles.

use serde::{Deserialize, Serialize};

use super::tables::{
    DMC_RATE_TABLE, DMC_SAMPLE_ADDR_STRIDE, DMC_SAMPLE_BASE, DMC_SAMPLE_LEN_STRIDE,
};

/// Pending sample fetch the bus must service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmcFetch {
    pub addr: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct Dmc {
    irq_enable: bool,
    loop_flag: bool,
    rate_index: u8,
    /// 7-bit DAC level.
    output_level: u8,
    sample_address: u16,
    sample_length: u16,
    current_address: u16,
    bytes_remaining: u16,
    sample_buffer: Option<u8>,
    shift_register: u8,
    bits_remaining: u8,
    silence: bool,
    timer: u16,
    timer_period: u16,
    fetch_outstanding: bool,
    pub(super) irq_pending: bool,
}

impl Default for Dmc {
    fn default() -> Self {
        Self {
            irq_enable: false,
            loop_flag: false,
            rate_index: 0,
            output_level: 0,
            sample_address: DMC_SAMPLE_BASE,
            sample_length: 1,
            current_address: DMC_SAMPLE_BASE,
            bytes_remaining: 0,
            sample_buffer: None,
            shift_register: 0,
            bits_remaining: 8,
            silence: true,
            timer: DMC_RATE_TABLE[0] - 1,
            timer_period: DMC_RATE_TABLE[0] - 1,
            fetch_outstanding: false,
            irq_pending: false,
        }
    }
}

impl Dmc {
    pub(super) fn write_control(&mut self, value: u8) {
        self.irq_enable = value & 0x80 != 0;
        if !self.irq_enable {
            self.irq_pending = false;
        }
        self.loop_flag = value & 0x40 != 0;
        self.rate_index = value & 0x0F;
        self.timer_period = DMC_RATE_TABLE[self.rate_index as usize] - 1;
    }

    pub(super) fn write_direct_load(&mut self, value: u8) {
        self.output_level = value & 0x7F;
    }

    pub(super) fn write_sample_address(&mut self, value: u8) {
        self.sample_address = DMC_SAMPLE_BASE.wrapping_add(value as u16 * DMC_SAMPLE_ADDR_STRIDE);
    }

    pub(super) fn write_sample_length(&mut self, value: u8) {
        self.sample_length = value as u16 * DMC_SAMPLE_LEN_STRIDE + 1;
    }

    pub(super) fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.bytes_remaining = 0;
        } else if self.bytes_remaining == 0 {
            self.restart_sample();
        }
    }

    fn restart_sample(&mut self) {
        self.current_address = self.sample_address;
        self.bytes_remaining = self.sample_length;
    }

    pub(super) fn active(&self) -> bool {
        self.bytes_remaining > 0
    }

    /// CPU-cycle tick. Returns a fetch request when the sample buffer needs
    /// refilling.
    pub(super) fn clock_timer(&mut self) -> Option<DmcFetch> {
        if self.timer == 0 {
            self.timer = self.timer_period;
            self.shift_output();
        } else {
            self.timer -= 1;
        }

        if self.sample_buffer.is_none() && self.bytes_remaining > 0 && !self.fetch_outstanding {
            self.fetch_outstanding = true;
            return Some(DmcFetch {
                addr: self.current_address,
            });
        }
        None
    }

    fn shift_output(&mut self) {
        if !self.silence {
            if self.shift_register & 1 != 0 {
                if self.output_level <= 125 {
                    self.output_level += 2;
                }
            } else if self.output_level >= 2 {
                self.output_level -= 2;
            }
            self.shift_register >>= 1;
        }

        self.bits_remaining -= 1;
        if self.bits_remaining == 0 {
            self.bits_remaining = 8;
            match self.sample_buffer.take() {
                Some(byte) => {
                    self.shift_register = byte;
                    self.silence = false;
                }
                None => self.silence = true,
            }
        }
    }

    /// Completes a fetch the bus performed on our behalf.
    pub(super) fn finish_fetch(&mut self, byte: u8) {
        if !self.fetch_outstanding {
            return;
        }
        self.fetch_outstanding = false;
        self.sample_buffer = Some(byte);
        self.current_address = if self.current_address == 0xFFFF {
            0x8000
        } else {
            self.current_address + 1
        };
        self.bytes_remaining -= 1;
        if self.bytes_remaining == 0 {
            if self.loop_flag {
                self.restart_sample();
            } else if self.irq_enable {
                self.irq_pending = true;
            }
        }
    }

    pub(super) fn output(&self) -> u8 {
        self.output_level
    }
}
