use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use serde::Deserialize;

use super::{
    Addr,
    BadBlockTable,
    BlockState,
    Device,
    Geometry,
    ReadResult,
    STATUS_EMPTY_PAGE,
    STATUS_INTERNAL,
    STATUS_OUT_OF_RANGE,
    STATUS_UNRECOVERED,
};
use crate::error::{Error, Result};


/// Description of a captured device, stored as JSON next to the image.
///
/// ```json
/// {
///   "image": "ocssd.img",
///   "geometry": { "channels": 2, "luns_per_channel": 2, "planes": 1,
///                 "blocks_per_die": 16, "pages_per_block": 8,
///                 "sectors_per_page": 1, "sector_bytes": 4096 },
///   "bad_blocks": [ { "ch": 0, "lun": 1, "blk": 3 } ],
///   "media_errors": [ { "ch": 1, "lun": 0, "blk": 2, "pg": 7 } ]
/// }
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct Manifest {
    /// Image path, relative to the manifest.
    pub image: PathBuf,
    pub geometry: Geometry,
    #[serde(default)]
    pub bad_blocks: Vec<BadBlockEntry>,
    #[serde(default)]
    pub media_errors: Vec<PageEntry>,
}


/// A bad plane block. Without `pl`, every plane of the block is bad.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct BadBlockEntry {
    pub ch: u16,
    pub lun: u16,
    pub blk: u16,
    #[serde(default)]
    pub pl: Option<u16>,
    #[serde(default = "default_bad_state")]
    pub state: u8,
}

fn default_bad_state() -> u8
{
    0x1
}


/// A page whose reads fail with an unrecovered read error.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
pub struct PageEntry {
    pub ch: u16,
    pub lun: u16,
    pub blk: u16,
    pub pg: u16,
}


/// Device backed by a flat image file.
///
/// The image is laid out die-major (dies in flattened order), then by block,
/// page, plane and sector.
#[derive(Debug)]
pub struct ImageDevice {
    geo: Geometry,
    image: File,
    image_path: PathBuf,
    image_len: u64,
    bbts: Vec<BadBlockTable>,
    media_errors: HashSet<PageEntry>,
}

impl ImageDevice {
    /// Opens the device described by the manifest at `path`.
    pub fn open(path: &Path) -> Result<Self>
    {
        let f = File::open(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: Manifest = serde_json::from_reader(f).map_err(|source| Error::Manifest {
            path: path.to_path_buf(),
            source,
        })?;

        let image_path = match path.parent() {
            Some(dir) => dir.join(&manifest.image),
            None => manifest.image.clone(),
        };

        Self::from_manifest(manifest, image_path)
    }

    pub fn from_manifest(manifest: Manifest, image_path: PathBuf) -> Result<Self>
    {
        let geo = manifest.geometry;
        geo.validate()?;

        // Read-only: the tool never writes to the device.
        let image = OpenOptions::new()
            .create(false)
            .read(true)
            .write(false)
            .open(&image_path)
            .map_err(|source| Error::Io { path: image_path.clone(), source })?;
        let image_len = image
            .metadata()
            .map_err(|source| Error::Io { path: image_path.clone(), source })?
            .len();

        let mut bbts: Vec<BadBlockTable> = (0..geo.total_dies())
            .map(|die| BadBlockTable::all_good(geo.die_addr(die), &geo))
            .collect();

        for entry in &manifest.bad_blocks {
            let addr = Addr { ch: entry.ch, lun: entry.lun, ..Addr::default() };
            if !in_geometry(&geo, &addr)
                || entry.blk as usize >= geo.blocks_per_die
                || entry.pl.map_or(false, |pl| pl as usize >= geo.planes)
            {
                return Err(Error::InvalidArgument(format!(
                    "manifest: bad block {:?} is outside of the geometry", entry
                )));
            }

            let bbt = &mut bbts[geo.die_index(&addr)];
            let state = BlockState(entry.state);
            match entry.pl {
                Some(pl) => bbt.mark(entry.blk as usize, pl as usize, geo.planes, state),
                None => {
                    for pl in 0..geo.planes {
                        bbt.mark(entry.blk as usize, pl, geo.planes, state);
                    }
                }
            }
        }

        Ok(Self {
            geo,
            image,
            image_path,
            image_len,
            bbts,
            media_errors: manifest.media_errors.into_iter().collect(),
        })
    }

    pub fn image_path(&self) -> &Path
    {
        &self.image_path
    }

    /// Byte offset of the sector `addr` within the image.
    fn offset_of(&self, addr: &Addr) -> u64
    {
        let geo = &self.geo;
        let die = geo.die_index(addr) as u64;

        let mut off = die * geo.blocks_per_die as u64 + addr.blk as u64;
        off = off * geo.pages_per_block as u64 + addr.pg as u64;
        off = off * geo.planes as u64 + addr.pl as u64;
        off = off * geo.sectors_per_page as u64 + addr.sec as u64;

        off * geo.sector_bytes as u64
    }
}

impl Device for ImageDevice {
    fn geometry(&self) -> &Geometry
    {
        &self.geo
    }

    fn bad_block_table(&mut self, die: Addr) -> Result<BadBlockTable>
    {
        if !in_geometry(&self.geo, &die) {
            return Err(Error::BadBlockTable {
                addr: die.to_string(),
                reason: "die is outside of the geometry".to_string(),
            });
        }

        Ok(self.bbts[self.geo.die_index(&die)].clone())
    }

    fn read_raw(&mut self, addr: Addr, buf: &mut [u8]) -> ReadResult
    {
        let page = PageEntry { ch: addr.ch, lun: addr.lun, blk: addr.blk, pg: addr.pg };

        if !in_geometry(&self.geo, &addr)
            || addr.blk as usize >= self.geo.blocks_per_die
            || addr.pg as usize >= self.geo.pages_per_block
        {
            return ReadResult::error(STATUS_OUT_OF_RANGE);
        }

        let off = self.offset_of(&addr);
        if off + buf.len() as u64 > self.image_len {
            return ReadResult::error(STATUS_OUT_OF_RANGE);
        }

        if self.media_errors.contains(&page) {
            return ReadResult::error(STATUS_UNRECOVERED);
        }

        let res = self.image.seek(SeekFrom::Start(off))
            .and_then(|_| self.image.read_exact(buf));
        if let Err(e) = res {
            return ReadResult {
                status: STATUS_INTERNAL,
                result: e.raw_os_error().unwrap_or(0) as u32,
            };
        }

        // Erased flash reads back as all ones.
        if buf.iter().all(|&b| b == 0xff) {
            return ReadResult::error(STATUS_EMPTY_PAGE);
        }

        ReadResult::OK
    }
}


fn in_geometry(geo: &Geometry, addr: &Addr) -> bool
{
    (addr.ch as usize) < geo.channels
        && (addr.lun as usize) < geo.luns_per_channel
        && (addr.pl as usize) < geo.planes
        && (addr.sec as usize) < geo.sectors_per_page
}
