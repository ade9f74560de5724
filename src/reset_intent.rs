use embassy_time::Duration;
use log::info;

/// Value of an armed marker. Anything else, including cold-boot garbage,
/// reads as "not armed".
pub const ARMED_MARKER: u32 = 0xD0D0_1234;
pub const CLEARED_MARKER: u32 = 0x0000_0000;

/// Word of memory that keeps its content across a software reset.
pub trait BootMarker {
    fn read(&self) -> u32;
    fn write(&mut self, value: u32);
}

/// Double-reset detection. Every boot arms a marker that survives a warm
/// reset but not a power loss, and the marker is cleared once the window has
/// passed. Finding it still armed means the operator asks for provisioning.
pub struct ResetIntentDetector<M> {
    marker: M,
    window: Duration,
    armed: bool,
}

impl<M: BootMarker> ResetIntentDetector<M> {
    pub fn new(marker: M, window: Duration) -> Self {
        Self {
            marker,
            window,
            armed: false,
        }
    }

    /// Call once per boot. Returns true when the previous boot was reset
    /// strictly within the detection window.
    pub fn note_boot(&mut self) -> bool {
        let double_reset = self.marker.read() == ARMED_MARKER;
        self.marker.write(ARMED_MARKER);
        self.armed = true;

        if double_reset {
            info!("Double reset detected");
        }
        double_reset
    }

    /// Clears the marker so the next ordinary reboot is not taken for a
    /// double reset.
    pub fn stop(&mut self) {
        if self.armed {
            self.marker.write(CLEARED_MARKER);
            self.armed = false;
        }
    }

    /// Clears the marker once `since_boot` reaches the window. Returns true
    /// while the window is still open.
    pub fn expire(&mut self, since_boot: Duration) -> bool {
        if since_boot >= self.window {
            self.stop();
        }
        self.armed
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}
