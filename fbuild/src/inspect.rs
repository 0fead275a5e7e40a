use std::{
    fs::File,
    io::{self, Read},
    path::Path,
};

use goblin::elf::Elf;
use memmap2::Mmap;

use crate::types::BinaryKind;

const ELF_MAGIC_BYTES: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const MACHO_MAGIC_BYTES: [[u8; 4]; 4] = [
    [0xfe, 0xed, 0xfa, 0xce],
    [0xfe, 0xed, 0xfa, 0xcf],
    [0xce, 0xfa, 0xed, 0xfe],
    [0xcf, 0xfa, 0xed, 0xfe],
];
const SHEBANG: [u8; 2] = [b'#', b'!'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryInfo {
    pub kind: BinaryKind,
    /// Whether the symbol table was stripped; known for ELF only
    pub stripped: Option<bool>,
    pub size: u64,
}

pub fn calc_magic_bytes<P: AsRef<Path>>(file_path: P, size: usize) -> io::Result<Vec<u8>> {
    let file = File::open(file_path)?;
    let mut magic_bytes = Vec::with_capacity(size);
    file.take(size as u64).read_to_end(&mut magic_bytes)?;
    Ok(magic_bytes)
}

/// Classify a built artifact
pub fn inspect<P: AsRef<Path>>(path: P) -> io::Result<BinaryInfo> {
    let path = path.as_ref();
    let size = path.metadata()?.len();
    let magic_bytes = calc_magic_bytes(path, 4)?;

    if magic_bytes.starts_with(&SHEBANG) {
        return Ok(BinaryInfo {
            kind: BinaryKind::Script,
            stripped: None,
            size,
        });
    }

    if MACHO_MAGIC_BYTES.iter().any(|m| magic_bytes == m) {
        return Ok(BinaryInfo {
            kind: BinaryKind::MachO,
            stripped: None,
            size,
        });
    }

    if magic_bytes == ELF_MAGIC_BYTES {
        let file = File::open(path)?;
        // SAFETY: the file is only read while mapped and was produced by this build.
        let mmap = unsafe { Mmap::map(&file)? };
        let elf = Elf::parse(&mmap)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        let kind = if elf.interpreter.is_some() {
            BinaryKind::Dynamic
        } else {
            BinaryKind::Static
        };
        return Ok(BinaryInfo {
            kind,
            stripped: Some(elf.syms.is_empty()),
            size,
        });
    }

    Ok(BinaryInfo {
        kind: BinaryKind::Unknown,
        stripped: None,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool");
        std::fs::write(&path, "#!/bin/sh\necho hi\n").unwrap();

        let info = inspect(&path).unwrap();
        assert_eq!(info.kind, BinaryKind::Script);
        assert_eq!(info.stripped, None);
        assert_eq!(info.size, 18);
    }

    #[test]
    fn test_short_and_unknown_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, [0u8, 1]).unwrap();
        assert_eq!(inspect(&path).unwrap().kind, BinaryKind::Unknown);

        let path = dir.path().join("macho");
        std::fs::write(&path, [0xcf, 0xfa, 0xed, 0xfe, 0, 0]).unwrap();
        assert_eq!(inspect(&path).unwrap().kind, BinaryKind::MachO);
    }

    #[test]
    fn test_truncated_elf_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken");
        std::fs::write(&path, [0x7f, b'E', b'L', b'F', 2]).unwrap();
        assert!(inspect(&path).is_err());
    }
}
