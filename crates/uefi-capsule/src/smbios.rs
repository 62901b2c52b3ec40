//! SMBIOS structure table parsing and the UEFI-mode check.

use std::fs;
use std::path::Path;

use uefi_capsule_errors::{CapsuleError, Result};

/// BIOS Information.
pub const TYPE_BIOS_INFORMATION: u8 = 0;

/// End-of-table marker.
pub const TYPE_END_OF_TABLE: u8 = 127;

// offset of BIOS Characteristics Extension Byte 2
const BIOS_CHARACTERISTICS_EXT2: usize = 0x13;
const UEFI_SPECIFICATION_SUPPORTED: u8 = 1 << 3;

/// One structure: the formatted area and its trailing strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbiosStructure {
    /// Structure type
    pub kind: u8,
    /// Structure handle
    pub handle: u16,
    /// Formatted area, header included
    pub data: Vec<u8>,
    /// Strings referenced by one-based index from the formatted area
    pub strings: Vec<String>,
}

impl SmbiosStructure {
    /// String number `index`, one-based as in the formatted area.
    pub fn string(&self, index: u8) -> Option<&str> {
        let slot = usize::from(index).checked_sub(1)?;
        self.strings.get(slot).map(String::as_str)
    }
}

/// A parsed structure table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmbiosTable {
    structures: Vec<SmbiosStructure>,
}

impl SmbiosTable {
    /// Read and parse a raw table such as `/sys/firmware/dmi/tables/DMI`.
    ///
    /// A missing table means SMBIOS is not available at all.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CapsuleError::not_supported("SMBIOS not supported"));
        }
        let buf = fs::read(path)
            .map_err(|e| CapsuleError::io(format!("failed to read {}", path.display()), e))?;
        Self::parse(&buf)
    }

    /// Parse raw table bytes; parsing stops at the end-of-table marker.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut structures = Vec::new();
        let mut rest = buf;
        while let Some((&[kind, length, h0, h1], _)) = rest.split_first_chunk::<4>() {
            let length = usize::from(length);
            if length < 4 {
                return Err(CapsuleError::invalid_file(format!(
                    "SMBIOS structure {kind} has invalid length {length}"
                )));
            }
            let (data, tail) = rest.split_at_checked(length).ok_or_else(|| {
                CapsuleError::invalid_file(format!(
                    "SMBIOS structure {kind} is truncated"
                ))
            })?;
            let (strings, tail) = split_strings(tail).ok_or_else(|| {
                CapsuleError::invalid_file(format!(
                    "SMBIOS structure {kind} has unterminated strings"
                ))
            })?;
            structures.push(SmbiosStructure {
                kind,
                handle: u16::from_le_bytes([h0, h1]),
                data: data.to_vec(),
                strings,
            });
            if kind == TYPE_END_OF_TABLE {
                break;
            }
            rest = tail;
        }
        Ok(Self { structures })
    }

    /// All structures in table order.
    pub fn structures(&self) -> &[SmbiosStructure] {
        &self.structures
    }

    /// The first structure of `kind`.
    pub fn find(&self, kind: u8) -> Option<&SmbiosStructure> {
        self.structures.iter().find(|s| s.kind == kind)
    }
}

// The string set ends with a double NUL; an empty set is just the double NUL.
fn split_strings(buf: &[u8]) -> Option<(Vec<String>, &[u8])> {
    let end = buf.windows(2).position(|w| w == [0, 0])?;
    let (area, tail) = buf.split_at(end);
    let strings = area
        .split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect();
    Some((strings, tail.get(2..).unwrap_or_default()))
}

/// Check a BIOS Information structure for the UEFI-supported bit.
pub fn check_uefi_mode(bios_information: Option<&[u8]>) -> Result<()> {
    let data = bios_information.ok_or_else(|| CapsuleError::not_supported("SMBIOS not supported"))?;
    let ext2 = match data.get(BIOS_CHARACTERISTICS_EXT2) {
        Some(byte) => *byte,
        None => {
            return Err(CapsuleError::invalid_file(format!(
                "offset bigger than size {}",
                data.len()
            )));
        }
    };
    if data.get(1).is_none_or(|&len| usize::from(len) < BIOS_CHARACTERISTICS_EXT2) {
        return Err(CapsuleError::not_supported("SMBIOS 2.3 not supported"));
    }
    if ext2 & UEFI_SPECIFICATION_SUPPORTED == 0 {
        return Err(CapsuleError::not_supported(
            "System does not support UEFI mode",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uefi_capsule_test_helpers::fixtures::smbios_table;

    #[test]
    fn test_parse_table() -> Result<()> {
        let table = SmbiosTable::parse(&smbios_table(true))?;
        assert_eq!(table.structures().len(), 2);
        let bios = table.find(TYPE_BIOS_INFORMATION).ok_or_else(|| CapsuleError::not_found("bios"))?;
        assert_eq!(bios.data.len(), 0x18);
        assert_eq!(bios.string(1), Some("LENOVO"));
        assert_eq!(bios.string(3), Some("02/05/2020"));
        assert_eq!(bios.string(0), None);
        assert_eq!(table.find(TYPE_END_OF_TABLE).map(|s| s.handle), Some(1));
        Ok(())
    }

    #[test]
    fn test_uefi_bit() -> Result<()> {
        let table = SmbiosTable::parse(&smbios_table(true))?;
        check_uefi_mode(table.find(0).map(|s| s.data.as_slice()))?;

        let table = SmbiosTable::parse(&smbios_table(false))?;
        assert!(matches!(
            check_uefi_mode(table.find(0).map(|s| s.data.as_slice())),
            Err(CapsuleError::NotSupported(ref m)) if m == "System does not support UEFI mode"
        ));
        Ok(())
    }

    #[test]
    fn test_uefi_mode_check_errors() {
        assert!(matches!(
            check_uefi_mode(None),
            Err(CapsuleError::NotSupported(ref m)) if m == "SMBIOS not supported"
        ));
        assert!(matches!(
            check_uefi_mode(Some(&[0, 0x13, 0, 0])),
            Err(CapsuleError::InvalidFile(ref m)) if m == "offset bigger than size 4"
        ));
        // a complete 0x13-byte structure still lacks the extension byte
        assert!(matches!(
            check_uefi_mode(Some(&[0u8; 0x13])),
            Err(CapsuleError::InvalidFile(_))
        ));
        let mut old = vec![0u8; 0x14];
        if let Some(len) = old.get_mut(1) {
            *len = 0x12;
        }
        assert!(matches!(
            check_uefi_mode(Some(&old)),
            Err(CapsuleError::NotSupported(ref m)) if m == "SMBIOS 2.3 not supported"
        ));
    }

    #[test]
    fn test_truncated_table() {
        assert!(SmbiosTable::parse(&[0, 0x18, 0, 0, 1]).is_err());
        assert!(SmbiosTable::parse(&[0, 0x02, 0, 0]).is_err());
        assert!(matches!(SmbiosTable::parse(&[]), Ok(ref t) if t.structures().is_empty()));
    }
}
