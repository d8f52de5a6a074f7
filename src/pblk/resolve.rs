//! Locates the smeta and emeta pages of a line.
//!
//! pblk writes a line's metadata on the first die of the stripe whose block
//! for that line is intact, so dies are visited strictly in stripe order.

use crate::device::{Addr, BadBlockTable, Geometry};
use crate::error::{Error, Result};


/// Address of the smeta page (first page) of a line.
pub fn resolve_smeta_addr(line_id: u32, geo: &Geometry, bbts: &[BadBlockTable]) -> Result<Addr>
{
    let bbt = first_usable_die(line_id, geo, bbts).ok_or(Error::NoUsableDie { line: line_id })?;

    Ok(Addr {
        ch: bbt.addr.ch,
        lun: bbt.addr.lun,
        blk: line_id as u16,
        ..Addr::default()
    })
}


/// Address of the emeta page (last page) of a line.
pub fn resolve_emeta_addr(line_id: u32, geo: &Geometry, bbts: &[BadBlockTable]) -> Result<Addr>
{
    let bbt = first_usable_die(line_id, geo, bbts).ok_or(Error::NoUsableDie { line: line_id })?;

    Ok(Addr {
        ch: bbt.addr.ch,
        lun: bbt.addr.lun,
        blk: line_id as u16,
        pg: (geo.pages_per_block - 1) as u16,
        ..Addr::default()
    })
}


/// Returns the table of the first die in stripe order on which every plane
/// block of the line is good.
fn first_usable_die<'a>(line_id: u32, geo: &Geometry, bbts: &'a [BadBlockTable]) -> Option<&'a BadBlockTable>
{
    let blk_off = line_id as usize * geo.planes;
    let blk_lim = blk_off + geo.planes;

    bbts.iter().find(|bbt| {
        // A short table is treated as bad for the missing entries.
        match bbt.blocks.get(blk_off..blk_lim) {
            Some(blocks) => blocks.iter().all(|b| b.is_good()),
            None => false,
        }
    })
}
