//! Checksum calculations for network packets
//!
//! Implements the Internet Checksum (RFC 1071) used by IP, TCP and UDP.
//! The algorithm is exposed as two composable steps — accumulate and fold —
//! so a caller can sum several discontiguous regions (pseudo-header, then
//! header plus payload) before folding once.

/// Accumulate a byte region into a running one's-complement sum.
///
/// Data is treated as a sequence of big-endian 16-bit words; a trailing odd
/// byte is padded with zero on the right. When accumulating multiple
/// regions into one sum, every region except the last must have even
/// length, otherwise the word boundaries shift.
pub fn checksum_add(sum: u32, data: &[u8]) -> u32 {
    let mut sum = sum as u64;

    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u64;
    }
    if let Some(&byte) = chunks.remainder().first() {
        sum += (byte as u64) << 8;
    }

    // carries above 32 bits fold back in; the one's-complement sum is
    // unchanged by folding at any width
    while (sum >> 32) != 0 {
        sum = (sum & 0xFFFF_FFFF) + (sum >> 32);
    }
    sum as u32
}

/// Fold a running sum into the final complemented 16-bit checksum
pub fn checksum_fold(sum: u32) -> u16 {
    let mut sum = sum;
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !sum as u16
}

/// Calculate the Internet Checksum of a buffer in one shot
///
/// # Examples
///
/// ```
/// use lamina_packet::checksum::internet_checksum;
///
/// assert_eq!(internet_checksum(&[0u8; 20]), 0xFFFF);
/// ```
pub fn internet_checksum(data: &[u8]) -> u16 {
    checksum_fold(checksum_add(0, data))
}
