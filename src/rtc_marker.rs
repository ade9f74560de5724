use core::ptr::{addr_of, addr_of_mut};

use crate::reset_intent::BootMarker;

// RTC fast memory keeps its content across a software or reset-button reset
// and holds garbage after power-on.
#[esp_hal::ram(unstable(rtc_fast, persistent))]
static mut DOUBLE_RESET_MARKER: u32 = 0;

/// Reset marker word in RTC fast memory
#[derive(Debug, Clone, Copy, Default)]
pub struct RtcMarker;

impl BootMarker for RtcMarker {
    fn read(&self) -> u32 {
        // SAFETY: single core, only accessed through this handle from the main
        // executor; volatile so the access is never elided.
        unsafe { core::ptr::read_volatile(addr_of!(DOUBLE_RESET_MARKER)) }
    }

    fn write(&mut self, value: u32) {
        // SAFETY: see `read`
        unsafe { core::ptr::write_volatile(addr_of_mut!(DOUBLE_RESET_MARKER), value) }
    }
}
