use embassy_time::{Duration, Instant, Timer};

/// Time source and delay for the cooperative loops.
pub trait Clock {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the embassy time driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        Timer::after(duration).await
    }
}
