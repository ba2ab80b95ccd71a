//! Minimal ELF64 loader: parses `PT_LOAD` segments out of a little-endian
//! ELF64 executable and flattens them into one contiguous image plus an
//! entry PC, ready for `rv64_core::vm::Vm::init`.
//!
//! No relocation, no dynamic linking, no section-header parsing beyond
//! what is needed to locate the program header table — this is the
//! "out of scope" ELF loader the core design treats as an external
//! collaborator, implemented here as a small, independently-testable
//! satellite crate in the style of the pack's other binary-format
//! parsers (fixed-shape header, validate up front, typed accessors).

use std::fmt;

const EI_MAG: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;
const EM_RISCV: u16 = 243;
const PT_LOAD: u32 = 1;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;

/// Errors the loader can report for a malformed or unsupported ELF file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElfError {
    /// Fewer than 64 bytes — too short to hold even the ELF header.
    TooShort,
    /// The `\x7fELF` magic is missing.
    BadMagic,
    /// `e_ident[EI_CLASS]` is not `ELFCLASS64`.
    Not64Bit,
    /// `e_ident[EI_DATA]` is not `ELFDATA2LSB`.
    NotLittleEndian,
    /// `e_type` is neither `ET_EXEC` nor `ET_DYN`.
    NotExecutable,
    /// `e_machine` is not `EM_RISCV`.
    WrongMachine(u16),
    /// A program header table entry runs past the end of the file.
    ProgramHeaderOutOfBounds,
    /// A `PT_LOAD` segment's file range runs past the end of the file.
    SegmentOutOfBounds { offset: u64, filesz: u64, file_len: usize },
    /// No `PT_LOAD` segments were present — nothing to load.
    NoLoadSegments,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "file is shorter than the ELF64 header"),
            Self::BadMagic => write!(f, "missing \\x7fELF magic"),
            Self::Not64Bit => write!(f, "not a 64-bit ELF (EI_CLASS != ELFCLASS64)"),
            Self::NotLittleEndian => write!(f, "not little-endian (EI_DATA != ELFDATA2LSB)"),
            Self::NotExecutable => write!(f, "e_type is neither ET_EXEC nor ET_DYN"),
            Self::WrongMachine(m) => write!(f, "e_machine {m} is not EM_RISCV (243)"),
            Self::ProgramHeaderOutOfBounds => write!(f, "program header table runs past EOF"),
            Self::SegmentOutOfBounds { offset, filesz, file_len } => write!(
                f,
                "PT_LOAD segment at file offset {offset:#x} of size {filesz:#x} runs past EOF ({file_len} bytes)"
            ),
            Self::NoLoadSegments => write!(f, "ELF has no PT_LOAD segments"),
        }
    }
}

impl std::error::Error for ElfError {}

/// One `PT_LOAD` segment, as described by the program header.
#[derive(Debug, Clone, Copy)]
struct LoadSegment {
    vaddr: u64,
    file_offset: u64,
    filesz: u64,
    memsz: u64,
}

/// The result of flattening an ELF's `PT_LOAD` segments: one contiguous
/// image, the guest virtual address it should be loaded at, and the
/// entry PC.
#[derive(Debug, Clone)]
pub struct LoadedElf {
    pub image: Vec<u8>,
    pub load_address: u64,
    pub entry: u64,
}

/// Parse `bytes` as a little-endian ELF64 RISC-V executable and flatten
/// its `PT_LOAD` segments into one zero-filled image.
///
/// `load_address` in the result is the lowest `p_vaddr` among the
/// `PT_LOAD` segments; every segment is copied into the image at
/// `p_vaddr - load_address`, so the whole image can be written with a
/// single `Vm::init(Some(&image), load_address)` call. Bytes beyond
/// `p_filesz` up to `p_memsz` (bss) are left zero, matching the image's
/// initial zero-fill.
pub fn load(bytes: &[u8]) -> Result<LoadedElf, ElfError> {
    let header = Header::parse(bytes)?;
    let segments = header.load_segments(bytes)?;
    if segments.is_empty() {
        return Err(ElfError::NoLoadSegments);
    }

    let load_address = segments.iter().map(|s| s.vaddr).min().unwrap();
    let image_end = segments
        .iter()
        .map(|s| s.vaddr + s.memsz)
        .max()
        .unwrap();
    let mut image = vec![0u8; (image_end - load_address) as usize];

    for seg in &segments {
        let file_start = seg.file_offset as usize;
        let file_end = file_start + seg.filesz as usize;
        if file_end > bytes.len() {
            return Err(ElfError::SegmentOutOfBounds {
                offset: seg.file_offset,
                filesz: seg.filesz,
                file_len: bytes.len(),
            });
        }
        let image_start = (seg.vaddr - load_address) as usize;
        image[image_start..image_start + seg.filesz as usize]
            .copy_from_slice(&bytes[file_start..file_end]);
    }

    Ok(LoadedElf { image, load_address, entry: header.entry })
}

/// Parsed fields of the ELF64 file header needed to locate and walk the
/// program header table. Not exposed — callers only see [`LoadedElf`].
struct Header {
    entry: u64,
    phoff: u64,
    phentsize: u16,
    phnum: u16,
}

impl Header {
    fn parse(bytes: &[u8]) -> Result<Self, ElfError> {
        if bytes.len() < EHDR_SIZE {
            return Err(ElfError::TooShort);
        }
        if bytes[0..4] != EI_MAG {
            return Err(ElfError::BadMagic);
        }
        if bytes[4] != ELFCLASS64 {
            return Err(ElfError::Not64Bit);
        }
        if bytes[5] != ELFDATA2LSB {
            return Err(ElfError::NotLittleEndian);
        }

        let e_type = u16::from_le_bytes(bytes[16..18].try_into().unwrap());
        if e_type != ET_EXEC && e_type != ET_DYN {
            return Err(ElfError::NotExecutable);
        }
        let e_machine = u16::from_le_bytes(bytes[18..20].try_into().unwrap());
        if e_machine != EM_RISCV {
            return Err(ElfError::WrongMachine(e_machine));
        }

        let entry = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
        let phoff = u64::from_le_bytes(bytes[32..40].try_into().unwrap());
        let phentsize = u16::from_le_bytes(bytes[54..56].try_into().unwrap());
        let phnum = u16::from_le_bytes(bytes[56..58].try_into().unwrap());

        Ok(Self { entry, phoff, phentsize, phnum })
    }

    fn load_segments(&self, bytes: &[u8]) -> Result<Vec<LoadSegment>, ElfError> {
        let mut segments = Vec::new();
        for i in 0..self.phnum as u64 {
            let off = self.phoff + i * self.phentsize as u64;
            let end = off + PHDR_SIZE as u64;
            if end > bytes.len() as u64 {
                return Err(ElfError::ProgramHeaderOutOfBounds);
            }
            let ph = &bytes[off as usize..end as usize];
            let p_type = u32::from_le_bytes(ph[0..4].try_into().unwrap());
            if p_type != PT_LOAD {
                continue;
            }
            let p_offset = u64::from_le_bytes(ph[8..16].try_into().unwrap());
            let p_vaddr = u64::from_le_bytes(ph[16..24].try_into().unwrap());
            let p_filesz = u64::from_le_bytes(ph[32..40].try_into().unwrap());
            let p_memsz = u64::from_le_bytes(ph[40..48].try_into().unwrap());
            segments.push(LoadSegment {
                vaddr: p_vaddr,
                file_offset: p_offset,
                filesz: p_filesz,
                memsz: p_memsz,
            });
        }
        Ok(segments)
    }
}
