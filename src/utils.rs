use anyhow::{anyhow, bail, Result};

pub trait FromBytes: Sized {
    fn from_bytes(bytes: &[u8]) -> Result<Self>;
}

impl<T: Copy> FromBytes for T {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < std::mem::size_of::<T>() {
            return Err(anyhow!(
                "Expected {} bytes, got {}",
                std::mem::size_of::<T>(),
                bytes.len()
            ));
        }
        let mut value = std::mem::MaybeUninit::<T>::uninit();
        // SAFETY: only used with the plain-integer ELF structs from libc,
        // for which every bit pattern is valid.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                value.as_mut_ptr() as *mut u8,
                std::mem::size_of::<T>(),
            );
            Ok(value.assume_init())
        }
    }
}

/// Parses a hex number with or without a `0x` prefix.
pub fn parse_hex(text: &str) -> Result<u64> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        bail!("Invalid hex value: '{}'", text);
    }
    u64::from_str_radix(digits, 16).map_err(|_| anyhow!("Invalid hex value: {}", text))
}

pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
