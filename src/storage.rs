use crc::{Crc, CRC_32_ISO_HDLC};
use embedded_storage::nor_flash::NorFlash;
use log::{info, warn};

use crate::config::{self, DeviceConfig};
use crate::error::ConfigError;

/// Size of one record slot, one ESP32 flash sector
pub const SLOT_SIZE: u32 = 4096;
/// Number of alternating slots
const SLOT_COUNT: u32 = 2;
/// Largest JSON body a slot accepts
pub const MAX_RECORD_LEN: usize = 1024;

const RECORD_MAGIC: [u8; 4] = *b"SNCF";
const HEADER_LEN: usize = 16;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

enum Slot {
    Empty,
    Invalid,
    Valid { sequence: u32, config: DeviceConfig },
}

/// Configuration record in two alternating erase sectors, so a save never
/// overwrites the copy a later `load` would fall back to.
///
/// ```text
/// offset 0   magic "SNCF"
/// offset 4   sequence   u32 LE, bumped on every save
/// offset 8   length     u32 LE, JSON body length
/// offset 12  crc32      u32 LE, CRC-32/ISO-HDLC of the body
/// offset 16  body       JSON, padded to the flash write size with 0xFF
/// ```
///
/// The body is written before the header. An interrupted save leaves an
/// erased header or a CRC mismatch in the target slot.
pub struct ConfigStore<F> {
    flash: F,
    base: u32,
}

impl<F: NorFlash> ConfigStore<F> {
    /// `base` must be aligned to the flash erase size and leave room for
    /// two `SLOT_SIZE` slots.
    pub fn new(flash: F, base: u32) -> Self {
        Self { flash, base }
    }

    pub fn load(&mut self) -> Result<DeviceConfig, ConfigError> {
        let mut seen_record = false;
        let mut newest: Option<(u32, DeviceConfig)> = None;

        for index in 0..SLOT_COUNT {
            match self.read_slot(index)? {
                Slot::Empty => {}
                Slot::Invalid => seen_record = true,
                Slot::Valid { sequence, config } => {
                    seen_record = true;
                    let replace = match &newest {
                        Some((current, _)) => is_newer(sequence, *current),
                        None => true,
                    };
                    if replace {
                        newest = Some((sequence, config));
                    }
                }
            }
        }

        match newest {
            Some((sequence, config)) => {
                info!("Loaded configuration record #{}", sequence);
                Ok(config)
            }
            None if seen_record => Err(ConfigError::Corrupt),
            None => Err(ConfigError::NotFound),
        }
    }

    pub fn save(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
        let body = config::encode(config)?;
        if body.len() > MAX_RECORD_LEN {
            return Err(ConfigError::WriteFailed);
        }

        let (target, sequence) = match self.newest_valid_slot()? {
            Some((index, sequence)) => ((index + 1) % SLOT_COUNT, sequence.wrapping_add(1)),
            None => (0, 1),
        };
        let offset = self.slot_offset(target);

        self.flash
            .erase(offset, offset + SLOT_SIZE)
            .map_err(|_| ConfigError::WriteFailed)?;

        let length = body.len();
        let crc = CRC32.checksum(&body);

        let mut padded = body;
        padded.resize(align_up(length, F::WRITE_SIZE), 0xFF);
        self.flash
            .write(offset + HEADER_LEN as u32, &padded)
            .map_err(|_| ConfigError::WriteFailed)?;

        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&RECORD_MAGIC);
        header[4..8].copy_from_slice(&sequence.to_le_bytes());
        header[8..12].copy_from_slice(&(length as u32).to_le_bytes());
        header[12..16].copy_from_slice(&crc.to_le_bytes());
        self.flash
            .write(offset, &header)
            .map_err(|_| ConfigError::WriteFailed)?;

        info!("Saved configuration record #{} to slot {}", sequence, target);
        Ok(())
    }

    fn slot_offset(&self, index: u32) -> u32 {
        self.base + index * SLOT_SIZE
    }

    fn newest_valid_slot(&mut self) -> Result<Option<(u32, u32)>, ConfigError> {
        let mut newest: Option<(u32, u32)> = None;
        for index in 0..SLOT_COUNT {
            if let Slot::Valid { sequence, .. } = self.read_slot(index)? {
                let replace = match newest {
                    Some((_, current)) => is_newer(sequence, current),
                    None => true,
                };
                if replace {
                    newest = Some((index, sequence));
                }
            }
        }
        Ok(newest)
    }

    fn read_slot(&mut self, index: u32) -> Result<Slot, ConfigError> {
        let offset = self.slot_offset(index);

        let mut header = [0u8; HEADER_LEN];
        self.flash
            .read(offset, &mut header)
            .map_err(|_| ConfigError::StorageUnavailable)?;

        if header[0..4] != RECORD_MAGIC {
            return Ok(Slot::Empty);
        }

        let sequence = read_u32(&header[4..8]);
        let length = read_u32(&header[8..12]) as usize;
        let crc = read_u32(&header[12..16]);

        if length == 0 || length > MAX_RECORD_LEN {
            warn!("Config slot {}: bad record length {}", index, length);
            return Ok(Slot::Invalid);
        }

        let mut body = [0u8; MAX_RECORD_LEN];
        let padded = align_up(length, F::READ_SIZE).min(MAX_RECORD_LEN);
        self.flash
            .read(offset + HEADER_LEN as u32, &mut body[..padded])
            .map_err(|_| ConfigError::StorageUnavailable)?;

        if CRC32.checksum(&body[..length]) != crc {
            warn!("Config slot {}: checksum mismatch", index);
            return Ok(Slot::Invalid);
        }

        match config::decode(&body[..length]) {
            Ok(config) => Ok(Slot::Valid { sequence, config }),
            Err(_) => Ok(Slot::Invalid),
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn align_up(len: usize, align: usize) -> usize {
    if align <= 1 {
        len
    } else {
        len.div_ceil(align) * align
    }
}

fn is_newer(candidate: u32, current: u32) -> bool {
    (candidate.wrapping_sub(current) as i32) > 0
}
