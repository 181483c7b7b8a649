use crate::error::{Error, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// 32-bit or 64-bit DWARF, selected by the initial length field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Format {
    Dwarf32,
    Dwarf64,
}

impl Format {
    pub fn offset_size(self) -> usize {
        match self {
            Format::Dwarf32 => 4,
            Format::Dwarf64 => 8,
        }
    }

    /// Size of the initial length field itself.
    pub fn initial_length_size(self) -> usize {
        match self {
            Format::Dwarf32 => 4,
            Format::Dwarf64 => 12,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endian,
    context: &'static str,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self {
            data,
            pos: 0,
            endian,
            context: "DWARF",
        }
    }

    /// Names the section in truncation faults.
    pub fn context(mut self, context: &'static str) -> Self {
        self.context = context;
        self
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    pub fn is_finished(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn truncated(&self) -> Error {
        Error::Truncated {
            context: self.context,
            offset: self.pos,
        }
    }

    pub fn advance(&mut self, amount: usize) -> Result<()> {
        match self.pos.checked_add(amount) {
            Some(end) if end <= self.data.len() => {
                self.pos = end;
                Ok(())
            }
            _ => Err(self.truncated()),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let value = *self.data.get(self.pos).ok_or_else(|| self.truncated())?;
        self.pos += 1;
        Ok(value)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_array::<2>()?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_array::<4>()?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        })
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_array::<8>()?;
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(bytes),
            Endian::Big => u64::from_be_bytes(bytes),
        })
    }

    /// Reads an unsigned integer of `width` bytes. Only 1, 2, 4 and 8 are
    /// meaningful widths for DWARF fields.
    pub fn read_uint(&mut self, width: usize) -> Result<u64> {
        match width {
            1 => Ok(self.read_u8()? as u64),
            2 => Ok(self.read_u16()? as u64),
            4 => Ok(self.read_u32()? as u64),
            8 => self.read_u64(),
            _ => Err(Error::UnsupportedWidth(width)),
        }
    }

    /// Reads an initial length field, switching to DWARF64 on the
    /// 0xffffffff escape.
    pub fn read_initial_length(&mut self) -> Result<(u64, Format)> {
        let short = self.read_u32()?;
        if short == u32::MAX {
            Ok((self.read_u64()?, Format::Dwarf64))
        } else {
            Ok((short as u64, Format::Dwarf32))
        }
    }

    pub fn read_offset(&mut self, format: Format) -> Result<u64> {
        self.read_uint(format.offset_size())
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let start = self.pos;
        self.advance(n)?;
        Ok(&self.data[start..self.pos])
    }

    pub fn read_uleb128(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            if shift < 64 {
                result |= ((byte & 0x7f) as u64) << shift;
            }
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(result)
    }

    pub fn read_sleb128(&mut self) -> Result<i64> {
        let mut result = 0i64;
        let mut shift = 0;
        let mut byte;

        loop {
            byte = self.read_u8()?;
            if shift < 64 {
                result |= ((byte & 0x7f) as i64) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }

        if shift < 64 && (byte & 0x40) != 0 {
            result |= (!0i64) << shift;
        }

        Ok(result)
    }

    pub fn read_cstr(&mut self) -> Result<&'a [u8]> {
        let rest = self.remaining();
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.truncated())?;
        let start = self.pos;
        self.pos += len + 1;
        Ok(&self.data[start..start + len])
    }
}
