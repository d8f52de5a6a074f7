use bincode::{DefaultOptions, Options};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};


// Source: drivers/lightnvm/pblk.h

pub const PBLK_META_IDENT: u32 = 0x70626c6b; // "pblk"
pub const PBLK_META_VER: u16 = 0x1;
/// Reserved line id meaning "no line".
pub const NONE_ID: u32 = 0xffff_ffff;

pub const HEADER_SIZE: usize = 32;
pub const SMETA_SIZE: usize = 60;
pub const EMETA_FIXED_SIZE: usize = 64;
/// Body checksums cover everything after the header and the body `crc`.
const BODY_CRC_START: usize = HEADER_SIZE + 4;


/// Line types (`line_header.type`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineType {
    Free,
    Log,
    Data,
}

impl LineType {
    pub fn from_raw(raw: u16) -> Option<Self>
    {
        match raw {
            0 => Some(Self::Free),
            1 => Some(Self::Log),
            2 => Some(Self::Data),
            _ => None,
        }
    }

    pub fn to_raw(self) -> u16
    {
        match self {
            Self::Free => 0,
            Self::Log => 1,
            Self::Data => 2,
        }
    }
}


/// Header shared by smeta and emeta.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineHeader {
    pub crc: u32,        // crc32 of the remaining header fields
    pub identifier: u32, // PBLK_META_IDENT
    pub uuid: [u8; 16],  // instance uuid
    #[serde(rename = "type")]
    pub line_type: u16,  // LineType
    pub version: u16,    // PBLK_META_VER
    pub id: u32,         // line id
}


/// Start-of-line metadata.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SMeta {
    pub header: LineHeader,
    pub crc: u32,           // crc32 of the body
    pub prev_id: u32,       // previous line in write order
    pub seq_nr: u64,        // sequence number at line open
    pub window_wr_lun: u32, // dies in the write window
    pub rsvd: [u32; 2],
}


/// End-of-line metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EMeta {
    pub header: LineHeader,
    pub crc: u32,
    pub prev_id: u32,
    pub seq_nr: u64,
    pub window_wr_lun: u32,
    pub next_id: u32,       // next line in write order
    pub nr_lbas: u64,       // valid entries in `lbas`
    /// Logical addresses mapped by the line. Decoded separately from the
    /// fixed part, and left out of serialized reports.
    #[serde(skip)]
    pub lbas: Vec<u64>,
}


/// On-media records are native-endian and packed.
fn bincode_opts() -> impl Options
{
    DefaultOptions::new()
        .with_fixint_encoding()
        .with_native_endian()
        .allow_trailing_bytes()
}


/// Decodes an smeta record. No validation besides the size.
pub fn decode_smeta(buf: &[u8]) -> Result<SMeta>
{
    if buf.len() < SMETA_SIZE {
        return Err(Error::TruncatedBuffer { needed: SMETA_SIZE, available: buf.len() });
    }

    Ok(bincode_opts().deserialize(&buf[..SMETA_SIZE])?)
}


/// Decodes an emeta record, including its trailing lba list.
/// A `nr_lbas` reaching past the end of `buf` fails the decode.
pub fn decode_emeta(buf: &[u8]) -> Result<EMeta>
{
    if buf.len() < EMETA_FIXED_SIZE {
        return Err(Error::TruncatedBuffer { needed: EMETA_FIXED_SIZE, available: buf.len() });
    }

    let mut emeta: EMeta = bincode_opts().deserialize(&buf[..EMETA_FIXED_SIZE])?;

    let needed = usize::try_from(emeta.nr_lbas)
        .ok()
        .and_then(|n| n.checked_mul(8))
        .and_then(|n| n.checked_add(EMETA_FIXED_SIZE));
    let end = match needed {
        Some(end) if end <= buf.len() => end,
        _ => return Err(Error::TruncatedBuffer {
            needed: needed.unwrap_or(usize::MAX),
            available: buf.len(),
        }),
    };

    emeta.lbas = buf[EMETA_FIXED_SIZE..end]
        .chunks_exact(8)
        .map(|c| bincode_opts().deserialize(c))
        .collect::<std::result::Result<Vec<u64>, _>>()?;

    Ok(emeta)
}


/// Conventional CRC-32 (reflected 0xedb88320, complemented in and out).
pub fn crc32(buf: &[u8]) -> u32
{
    crc::crc32::update(0, &crc::crc32::IEEE_TABLE, buf)
}


/// Checksum of a header, excluding its own `crc` field.
pub fn header_crc(header: &LineHeader) -> Result<u32>
{
    Ok(crc32(&header.encode()?[4..]))
}


/// Checksum of the smeta body, over the first `length` bytes of the record.
pub fn smeta_body_crc(smeta: &SMeta, length: usize) -> Result<u32>
{
    Ok(body_crc(&smeta.encode()?, length))
}


/// Checksum of the emeta body, over the first `length` bytes of the record.
pub fn emeta_body_crc(emeta: &EMeta, length: usize) -> Result<u32>
{
    Ok(body_crc(&emeta.encode()?, length))
}


fn body_crc(raw: &[u8], length: usize) -> u32
{
    let end = length.min(raw.len()).max(BODY_CRC_START);

    crc32(&raw[BODY_CRC_START..end])
}


/// Checks whether `smeta` is the first line of a freshly created instance.
pub fn validate_first_smeta(smeta: &SMeta) -> bool
{
    smeta.header.identifier_ok()
        && smeta.header.version_ok()
        && smeta.header.crc_ok()
        && smeta.header.id == 0
        && smeta.prev_id == NONE_ID
        && smeta.seq_nr == 0
}


impl LineHeader {
    pub fn identifier_ok(&self) -> bool
    {
        self.identifier == PBLK_META_IDENT
    }

    pub fn version_ok(&self) -> bool
    {
        self.version == PBLK_META_VER
    }

    pub fn crc_ok(&self) -> bool
    {
        header_crc(self).map_or(false, |crc| crc == self.crc)
    }

    pub fn line_type(&self) -> Option<LineType>
    {
        LineType::from_raw(self.line_type)
    }

    pub fn encode(&self) -> Result<Vec<u8>>
    {
        Ok(bincode_opts().serialize(self)?)
    }
}


impl SMeta {
    pub fn body_crc_ok(&self) -> bool
    {
        smeta_body_crc(self, SMETA_SIZE).map_or(false, |crc| crc == self.crc)
    }

    pub fn encode(&self) -> Result<Vec<u8>>
    {
        Ok(bincode_opts().serialize(self)?)
    }
}


impl EMeta {
    /// Length of the record on media.
    pub fn len(&self) -> usize
    {
        EMETA_FIXED_SIZE + self.lbas.len() * 8
    }

    pub fn body_crc_ok(&self) -> bool
    {
        emeta_body_crc(self, self.len()).map_or(false, |crc| crc == self.crc)
    }

    /// Encodes the fixed part followed by the lba list.
    pub fn encode(&self) -> Result<Vec<u8>>
    {
        let mut out = bincode_opts().serialize(self)?;

        out.reserve(self.lbas.len() * 8);
        for lba in &self.lbas {
            bincode_opts().serialize_into(&mut out, lba)?;
        }

        Ok(out)
    }
}


// Debug and Display implementations.


impl std::fmt::Display for LineType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        match self {
            Self::Free => write!(f, "PBLK_LINETYPE_FREE"),
            Self::Log => write!(f, "PBLK_LINETYPE_LOG"),
            Self::Data => write!(f, "PBLK_LINETYPE_DATA"),
        }
    }
}
