use crate::error::{ClipError, Result};

/// MSB-first bit reader over a byte slice.
///
/// Covers what codec configuration records need: fixed-width fields for
/// the MPEG-4 AudioSpecificConfig and exp-Golomb ue(v)/se(v) fields for
/// H.264 parameter sets.
///
/// ```
/// use clipstream::utils::BitReader;
///
/// let data = [0b1011_0011];
/// let mut reader = BitReader::new(&data);
///
/// assert!(reader.read_flag().unwrap());
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011);
/// assert_eq!(reader.available_bits(), 4);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// A reader at the first bit of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        BitReader { data, pos: 0 }
    }

    /// Reads one bit.
    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = self
            .data
            .get(self.pos / 8)
            .ok_or_else(|| ClipError::InvalidData("bitstream ended early".into()))?;
        let bit = (byte >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        Ok(bit == 1)
    }

    /// Reads a one-bit flag.
    pub fn read_flag(&mut self) -> Result<bool> {
        self.read_bit()
    }

    /// Reads `n <= 32` bits as a big-endian unsigned value.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(ClipError::InvalidData(format!("cannot read {} bits at once", n)));
        }
        if (n as usize) > self.available_bits() {
            return Err(ClipError::InvalidData("bitstream ended early".into()));
        }
        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value as u32)
    }

    /// Reads `n <= 8` bits.
    pub fn read_u8(&mut self, n: u32) -> Result<u8> {
        if n > 8 {
            return Err(ClipError::InvalidData(format!("{} bits do not fit a u8", n)));
        }
        Ok(self.read_bits(n)? as u8)
    }

    /// ue(v): `m` zero bits, a one, then `m` info bits; value is
    /// `2^m - 1 + info`.
    pub fn read_golomb(&mut self) -> Result<u32> {
        let mut zeros = 0u32;
        while !self.read_bit()? {
            zeros += 1;
            if zeros > 31 {
                return Err(ClipError::InvalidData(
                    "exp-Golomb prefix longer than 31 bits".into(),
                ));
            }
        }
        let info = self.read_bits(zeros)?;
        Ok(((1u64 << zeros) - 1 + info as u64) as u32)
    }

    /// se(v): odd codes map to positive values, even codes to negative.
    pub fn read_signed_golomb(&mut self) -> Result<i32> {
        let k = self.read_golomb()? as i64;
        let magnitude = (k + 1) / 2;
        Ok(if k % 2 == 1 { magnitude } else { -magnitude } as i32)
    }

    /// Skips `n` bits.
    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        if (n as usize) > self.available_bits() {
            return Err(ClipError::InvalidData("bitstream ended early".into()));
        }
        self.pos += n as usize;
        Ok(())
    }

    /// Bits left to read.
    pub fn available_bits(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    /// Bits consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }
}
