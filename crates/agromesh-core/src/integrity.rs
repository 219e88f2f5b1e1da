//! CRC-16 integrity trailer.
//!
//! CCITT-FALSE variant: polynomial 0x1021, initial value 0xFFFF, MSB-first,
//! no reflection, no final XOR. Cataloged in the `crc` crate as
//! CRC_16_IBM_3740. The trailer is written big-endian.

use crc::{Crc, CRC_16_IBM_3740};

use crate::wire::{WireError, CRC_LEN};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// CRC over the whole slice.
pub fn compute(buf: &[u8]) -> u16 {
    CRC16.checksum(buf)
}

/// Compute the CRC over `buf[..n]` and write it big-endian at `buf[n..n + 2]`.
pub fn append(buf: &mut [u8], n: usize) -> Result<(), WireError> {
    if buf.len() < n + CRC_LEN {
        return Err(WireError::BufferTooSmall {
            needed: n + CRC_LEN,
            got: buf.len(),
        });
    }
    let crc = compute(&buf[..n]);
    buf[n..n + CRC_LEN].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

/// Check that the last two bytes of `buf` are the CRC of everything before them.
///
/// Returns false for anything shorter than the trailer itself.
pub fn validate(buf: &[u8]) -> bool {
    if buf.len() < CRC_LEN {
        return false;
    }
    let body = buf.len() - CRC_LEN;
    compute(&buf[..body]).to_be_bytes() == buf[body..]
}
