//! Builders for well-formed meta data records.

use crate::device::{Addr, Geometry};
use crate::device::mem::MemDevice;
use super::meta::{
    emeta_body_crc,
    header_crc,
    smeta_body_crc,
    EMeta,
    LineHeader,
    LineType,
    SMeta,
    NONE_ID,
    PBLK_META_IDENT,
    PBLK_META_VER,
    SMETA_SIZE,
};


pub const UUID: [u8; 16] = *b"pblk-meta-fixtur";


pub fn header(id: u32) -> LineHeader
{
    let mut header = LineHeader {
        crc: 0,
        identifier: PBLK_META_IDENT,
        uuid: UUID,
        line_type: LineType::Data.to_raw(),
        version: PBLK_META_VER,
        id,
    };
    header.crc = header_crc(&header).unwrap();

    header
}

pub fn seal_smeta(smeta: &mut SMeta)
{
    smeta.header.crc = header_crc(&smeta.header).unwrap();
    smeta.crc = smeta_body_crc(smeta, SMETA_SIZE).unwrap();
}

pub fn seal_emeta(emeta: &mut EMeta)
{
    emeta.header.crc = header_crc(&emeta.header).unwrap();
    emeta.crc = emeta_body_crc(emeta, emeta.len()).unwrap();
}

pub fn smeta(id: u32, prev_id: u32, seq_nr: u64, window_wr_lun: u32) -> SMeta
{
    let mut smeta = SMeta {
        header: header(id),
        crc: 0,
        prev_id,
        seq_nr,
        window_wr_lun,
        rsvd: [0; 2],
    };
    seal_smeta(&mut smeta);

    smeta
}

pub fn first_smeta(window_wr_lun: u32) -> SMeta
{
    smeta(0, NONE_ID, 0, window_wr_lun)
}

pub fn emeta(id: u32, prev_id: u32, seq_nr: u64, window_wr_lun: u32, next_id: u32, lbas: &[u64]) -> EMeta
{
    let mut emeta = EMeta {
        header: header(id),
        crc: 0,
        prev_id,
        seq_nr,
        window_wr_lun,
        next_id,
        nr_lbas: lbas.len() as u64,
        lbas: lbas.to_vec(),
    };
    seal_emeta(&mut emeta);

    emeta
}

/// Single-plane geometry with `dies` channels of one die each.
pub fn geometry(dies: usize, blocks_per_die: usize) -> Geometry
{
    Geometry {
        channels: dies,
        luns_per_channel: 1,
        planes: 1,
        blocks_per_die,
        pages_per_block: 8,
        sectors_per_page: 1,
        sector_bytes: 4096,
    }
}

/// Writes a closed line at the die its metadata resolves to.
pub fn write_line(dev: &mut MemDevice, die: usize, smeta: &SMeta, emeta: Option<&EMeta>)
{
    let geo = dev.geo;
    let base = Addr { blk: smeta.header.id as u16, ..geo.die_addr(die) };

    dev.write(base, smeta.encode().unwrap());
    if let Some(emeta) = emeta {
        let last = Addr { pg: (geo.pages_per_block - 1) as u16, ..base };
        dev.write(last, emeta.encode().unwrap());
    }
}
