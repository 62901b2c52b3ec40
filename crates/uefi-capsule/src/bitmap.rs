//! BMP header validation.

use serde::Serialize;
use uefi_capsule_errors::{CapsuleError, Result};

/// Smallest buffer that holds the file header and the DIB size/width/height.
pub const MIN_BITMAP_SIZE: usize = 26;

/// Dimensions read from a BMP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BitmapInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Validate a BMP buffer and return its dimensions.
///
/// Checks the `BM` signature, the pixel-data offset and the DIB header size.
/// All failures are `InvalidFile`.
pub fn parse(buf: &[u8]) -> Result<BitmapInfo> {
    if buf.len() < MIN_BITMAP_SIZE {
        return Err(CapsuleError::invalid_file(format!(
            "blob was too small {}",
            buf.len()
        )));
    }
    if !buf.starts_with(b"BM") {
        return Err(CapsuleError::invalid_file("invalid BMP header signature"));
    }

    let pixel_offset = read_u32(buf, 10)?;
    if pixel_offset < 26 {
        return Err(CapsuleError::invalid_file(format!(
            "BMP header invalid @ {pixel_offset} x26"
        )));
    }
    let dib_size = read_u32(buf, 14)?;
    if dib_size < 12 {
        return Err(CapsuleError::invalid_file(format!(
            "BITMAPINFOHEADER invalid @ {dib_size} x0e"
        )));
    }

    Ok(BitmapInfo {
        width: read_u32(buf, 18)?,
        height: read_u32(buf, 22)?,
    })
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    buf.get(offset..offset.saturating_add(4))
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| CapsuleError::invalid_file(format!("offset bigger than size {}", buf.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uefi_capsule_test_helpers::fixtures::bmp;

    #[test]
    fn test_parse_dimensions() -> Result<()> {
        let info = parse(&bmp(1920, 1080))?;
        assert_eq!(
            info,
            BitmapInfo {
                width: 1920,
                height: 1080
            }
        );
        Ok(())
    }

    #[test]
    fn test_too_small() {
        let buf = bmp(1, 1);
        let err = parse(buf.get(..25).unwrap_or_default());
        assert!(matches!(err, Err(CapsuleError::InvalidFile(ref m)) if m == "blob was too small 25"));
    }

    #[test]
    fn test_bad_signature() {
        let mut buf = bmp(1, 1);
        if let Some(b) = buf.first_mut() {
            *b = b'X';
        }
        let err = parse(&buf);
        assert!(
            matches!(err, Err(CapsuleError::InvalidFile(ref m)) if m == "invalid BMP header signature")
        );
    }

    #[test]
    fn test_bad_pixel_offset() {
        let mut buf = bmp(1, 1);
        if let Some(field) = buf.get_mut(10..14) {
            field.copy_from_slice(&25u32.to_le_bytes());
        }
        let err = parse(&buf);
        assert!(matches!(err, Err(CapsuleError::InvalidFile(ref m)) if m == "BMP header invalid @ 25 x26"));
    }

    #[test]
    fn test_bad_dib_size() {
        let mut buf = bmp(1, 1);
        if let Some(field) = buf.get_mut(14..18) {
            field.copy_from_slice(&11u32.to_le_bytes());
        }
        assert!(matches!(parse(&buf), Err(CapsuleError::InvalidFile(_))));
    }
}
