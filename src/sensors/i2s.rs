use embassy_executor::Spawner;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use esp_hal::{
    i2s::master::{asynch::I2sReadDmaTransferAsync, I2sRx},
    Async,
};
use log::{error, info};

use super::microphone::{le_samples, peak_amplitude};
use super::{SensorAdapter, SoundLevel};
use crate::error::SensorError;

/// Bytes popped from the DMA ring per level computation
const BLOCK_LEN: usize = 1024;

static LEVEL: Signal<CriticalSectionRawMutex, u16> = Signal::new();

/// I2S microphone fed by a circular DMA transfer in its own task. Each read
/// takes the level of the latest block.
pub struct I2sMicrophone {
    _private: (),
}

impl I2sMicrophone {
    /// Starts the circular transfer and the task consuming it. Either
    /// failing is an init failure.
    pub fn start(
        spawner: Spawner,
        rx: I2sRx<'static, Async>,
        buffer: &'static mut [u8],
    ) -> Result<Self, SensorError> {
        let transfer = rx.read_dma_circular_async(buffer).map_err(|e| {
            error!("Failed to start I2S transfer: {:?}", e);
            SensorError::InitFailed
        })?;
        spawner
            .spawn(capture(transfer))
            .map_err(|_| SensorError::InitFailed)?;
        Ok(Self { _private: () })
    }
}

impl SensorAdapter for I2sMicrophone {
    type Reading = SoundLevel;

    async fn read(&mut self) -> Result<SoundLevel, SensorError> {
        LEVEL.try_take().map(SoundLevel).ok_or(SensorError::ReadFailed)
    }
}

#[embassy_executor::task]
async fn capture(mut transfer: I2sReadDmaTransferAsync<'static, &'static mut [u8]>) {
    info!("Microphone capture started");

    let mut block = [0u8; BLOCK_LEN];
    loop {
        match transfer.pop(&mut block).await {
            Ok(n) => LEVEL.signal(peak_amplitude(le_samples(&block[..n]))),
            Err(e) => {
                error!("I2S read failed: {:?}", e);
                return;
            }
        }
    }
}
