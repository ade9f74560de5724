/// Peak absolute amplitude of a block of signed 16-bit samples
pub fn peak_amplitude(samples: impl IntoIterator<Item = i16>) -> u16 {
    samples
        .into_iter()
        .map(|s| s.unsigned_abs())
        .max()
        .unwrap_or(0)
}

/// Little-endian 16-bit samples from a DMA byte buffer; a trailing odd byte
/// is ignored
pub fn le_samples(bytes: &[u8]) -> impl Iterator<Item = i16> + '_ {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
}
