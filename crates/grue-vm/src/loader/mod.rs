// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Image loading, validation and verification.
//!
//! A Glulx image starts with a fixed header: magic, version, the memory
//! layout fields, the start function and the default string decoding table.
//! The image may arrive wrapped in an IFF `FORM` container (a Blorb file);
//! in that case the executable `GLUL` chunk is extracted first.

#[cfg(test)]
mod loader_test;

use byteorder::{BigEndian, ByteOrder};

use crate::memory::MEM_ALIGN;

/// The magic number `Glul` at offset 0.
pub const MAGIC: u32 = 0x476C_756C;

/// Lowest supported Glulx version (2.0.0).
pub const VERSION_MIN: u32 = 0x0002_0000;

/// Highest supported Glulx major/minor (3.1.x).
pub const VERSION_MAX: u32 = 0x0003_01FF;

/// Byte length of the fixed header.
pub const HEADER_LEN: u32 = 36;

/// Number of leading image bytes that form the game signature.
pub const SIGNATURE_LEN: usize = 64;

/// An image that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The file is too short to hold a header.
    TooShort,
    /// The magic number is not `Glul`.
    BadMagic(u32),
    /// The Glulx version is outside the supported range.
    BadVersion(u32),
    /// A header field violates the required segment ordering or alignment.
    BadLayout(&'static str),
    /// A `FORM` container without a usable `GLUL` chunk.
    BadContainer(&'static str),
}

impl core::fmt::Display for LoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TooShort => write!(f, "image too short for a Glulx header"),
            Self::BadMagic(m) => write!(f, "bad magic number {m:#010x}"),
            Self::BadVersion(v) => write!(f, "unsupported Glulx version {v:#010x}"),
            Self::BadLayout(what) => write!(f, "bad image layout: {what}"),
            Self::BadContainer(what) => write!(f, "bad container: {what}"),
        }
    }
}

impl std::error::Error for LoadError {}

/// The fixed Glulx header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Glulx version number (`0x00030102` is 3.1.2).
    pub version: u32,
    /// First writable address; everything below is ROM.
    pub ramstart: u32,
    /// Length of the image file; RAM beyond it starts zeroed.
    pub endgamefile: u32,
    /// Initial (and minimal) end of memory.
    pub origendmem: u32,
    /// Call stack size budget.
    pub stacksize: u32,
    /// Address of the function executed on startup and restart.
    pub startfuncaddr: u32,
    /// Address of the default string decoding table (0 for none).
    pub origstringtable: u32,
    /// Additive checksum over the whole image.
    pub checksum: u32,
}

/// Unwrap an IFF `FORM` container, returning the embedded `GLUL` chunk.
///
/// Bare images are returned unchanged.
pub fn unwrap_container(file: &[u8]) -> Result<&[u8], LoadError> {
    if file.len() < 12 || &file[0..4] != b"FORM" {
        return Ok(file);
    }
    let total = BigEndian::read_u32(&file[4..8]) as usize;
    let end = total
        .checked_add(8)
        .filter(|e| *e <= file.len())
        .ok_or(LoadError::BadContainer("FORM length exceeds file"))?;

    // Chunks follow the form type id, each padded to an even length.
    let mut pos = 12;
    while pos + 8 <= end {
        let id = &file[pos..pos + 4];
        let len = BigEndian::read_u32(&file[pos + 4..pos + 8]) as usize;
        let body = pos + 8;
        let body_end = body
            .checked_add(len)
            .filter(|e| *e <= end)
            .ok_or(LoadError::BadContainer("chunk length exceeds container"))?;
        if id == b"GLUL" {
            log::debug!("extracted GLUL chunk: {len} bytes at offset {body:#x}");
            return Ok(&file[body..body_end]);
        }
        pos = body_end + (len & 1);
    }
    Err(LoadError::BadContainer("no GLUL chunk"))
}

/// Parse and validate the header of a bare image.
pub fn parse_header(image: &[u8]) -> Result<Header, LoadError> {
    if (image.len() as u64) < u64::from(HEADER_LEN) {
        return Err(LoadError::TooShort);
    }
    let word = |off: usize| BigEndian::read_u32(&image[off..off + 4]);

    let magic = word(0);
    if magic != MAGIC {
        return Err(LoadError::BadMagic(magic));
    }
    let header = Header {
        version: word(4),
        ramstart: word(8),
        endgamefile: word(12),
        origendmem: word(16),
        stacksize: word(20),
        startfuncaddr: word(24),
        origstringtable: word(28),
        checksum: word(32),
    };
    if header.version < VERSION_MIN || header.version > VERSION_MAX {
        return Err(LoadError::BadVersion(header.version));
    }
    if header.ramstart < 0x100 {
        return Err(LoadError::BadLayout("ramstart below 0x100"));
    }
    if header.ramstart > header.endgamefile {
        return Err(LoadError::BadLayout("ramstart above end of file"));
    }
    if header.endgamefile > header.origendmem {
        return Err(LoadError::BadLayout("end of file above end of memory"));
    }
    if header.endgamefile as usize != image.len() {
        return Err(LoadError::BadLayout("file length does not match header"));
    }
    if header.ramstart % MEM_ALIGN != 0
        || header.endgamefile % MEM_ALIGN != 0
        || header.origendmem % MEM_ALIGN != 0
    {
        return Err(LoadError::BadLayout("segment bounds not 256-byte aligned"));
    }
    if header.stacksize % MEM_ALIGN != 0 {
        return Err(LoadError::BadLayout("stack size not 256-byte aligned"));
    }
    log::debug!(
        "loaded image: version {:#x}, ramstart {:#x}, endgamefile {:#x}, origendmem {:#x}",
        header.version,
        header.ramstart,
        header.endgamefile,
        header.origendmem
    );
    Ok(header)
}

/// Verify the image checksum (the `verify` opcode).
///
/// Sums every 32-bit word of the original image, counting the stored
/// checksum word as zero. Returns 0 on success, 1 on failure.
#[must_use]
pub fn verify_image(image: &[u8]) -> u32 {
    if image.len() < 0x100 || image.len() % MEM_ALIGN as usize != 0 {
        return 1;
    }
    let stored = BigEndian::read_u32(&image[32..36]);
    let mut sum = 0u32;
    for (i, chunk) in image.chunks_exact(4).enumerate() {
        if i == 8 {
            continue; // the checksum word itself
        }
        sum = sum.wrapping_add(BigEndian::read_u32(chunk));
    }
    u32::from(sum != stored)
}

/// Render the game signature: the first 64 image bytes in hex.
#[must_use]
pub fn signature(image: &[u8]) -> String {
    use core::fmt::Write as _;

    let mut out = String::with_capacity(SIGNATURE_LEN * 2);
    for byte in image.iter().take(SIGNATURE_LEN) {
        let _ = write!(out, "{byte:02X}");
    }
    out
}
