//! Small readers for sysfs-style attribute files.

use std::fs;
use std::path::Path;

use uefi_capsule_errors::{CapsuleError, Result};

/// Read a text attribute with surrounding whitespace removed.
pub fn read_string(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path)
        .map_err(|e| CapsuleError::io(format!("failed to read {}", path.display()), e))?;
    Ok(text.trim().to_string())
}

/// Read an unsigned attribute written in decimal or `0x` hexadecimal.
pub fn read_u64(path: &Path) -> Result<u64> {
    let text = read_string(path)?;
    parse_u64(&text).ok_or_else(|| {
        CapsuleError::invalid_file(format!(
            "failed to parse {} value '{text}'",
            path.display()
        ))
    })
}

/// Read an attribute that must fit in 32 bits.
pub fn read_u32(path: &Path) -> Result<u32> {
    let value = read_u64(path)?;
    u32::try_from(value).map_err(|_| {
        CapsuleError::invalid_file(format!("{} value {value} out of range", path.display()))
    })
}

/// Parse decimal or `0x`-prefixed hexadecimal text.
pub fn parse_u64(text: &str) -> Option<u64> {
    let text = text.trim();
    match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u64_forms() {
        assert_eq!(parse_u64("42"), Some(42));
        assert_eq!(parse_u64(" 0x10\n"), Some(16));
        assert_eq!(parse_u64("0XfE"), Some(0xfe));
        assert_eq!(parse_u64(""), None);
        assert_eq!(parse_u64("0x"), None);
        assert_eq!(parse_u64("-1"), None);
    }

    #[test]
    fn test_read_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fw_version");
        fs::write(&path, "65586\n")?;
        assert_eq!(read_u32(&path)?, 65586);
        assert_eq!(read_string(&path)?, "65586");

        fs::write(&path, "0x100000000\n")?;
        assert!(matches!(read_u32(&path), Err(CapsuleError::InvalidFile(_))));

        fs::write(&path, "garbage")?;
        assert!(matches!(read_u64(&path), Err(CapsuleError::InvalidFile(_))));

        assert!(matches!(
            read_u64(&dir.path().join("missing")),
            Err(CapsuleError::NotFound(_))
        ));
        Ok(())
    }
}
