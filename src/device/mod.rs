use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod image;
#[cfg(test)]
pub mod mem;

pub use image::ImageDevice;


// Read completion status codes, as reported by Open-Channel 1.2 devices.

/// Page was never programmed since the last erase.
pub const STATUS_EMPTY_PAGE: u64 = 0x42ff;
/// Unrecovered read error (uncorrectable ECC).
pub const STATUS_UNRECOVERED: u64 = 0x0281;
/// Address is outside of the device.
pub const STATUS_OUT_OF_RANGE: u64 = 0x0080;
/// Host side failure while servicing the read.
pub const STATUS_INTERNAL: u64 = 0x0006;


/// Physical address of a sector on an Open-Channel device.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Addr {
    pub ch: u16,  // Channel
    pub lun: u16, // Die within the channel
    pub pl: u16,  // Plane
    pub blk: u16, // Block
    pub pg: u16,  // Page
    pub sec: u16, // Sector within the page
}


/// Device geometry.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Geometry {
    pub channels: usize,
    pub luns_per_channel: usize,
    pub planes: usize,
    /// Block indices per plane. Every block index forms one line.
    pub blocks_per_die: usize,
    pub pages_per_block: usize,
    pub sectors_per_page: usize,
    pub sector_bytes: usize,
}

impl Geometry {
    /// Checks that every dimension is non-zero and addressable.
    pub fn validate(&self) -> Result<()>
    {
        // Dimensions indexed by an address field.
        let dims = [
            ("channels", self.channels),
            ("luns_per_channel", self.luns_per_channel),
            ("planes", self.planes),
            ("blocks_per_die", self.blocks_per_die),
            ("pages_per_block", self.pages_per_block),
            ("sectors_per_page", self.sectors_per_page),
        ];

        for (name, value) in dims {
            if value == 0 {
                return Err(Error::InvalidArgument(format!("geometry: {} is zero", name)));
            }
            if value > u16::MAX as usize + 1 {
                return Err(Error::InvalidArgument(format!(
                    "geometry: {} ({}) does not fit an address field", name, value
                )));
            }
        }

        if self.sector_bytes == 0 {
            return Err(Error::InvalidArgument("geometry: sector_bytes is zero".to_string()));
        }

        Ok(())
    }

    pub fn total_dies(&self) -> usize
    {
        self.channels * self.luns_per_channel
    }

    pub fn lines(&self) -> usize
    {
        self.blocks_per_die
    }

    /// Address of block 0, page 0 of a die given by its flattened index.
    /// The channel varies fastest.
    pub fn die_addr(&self, die: usize) -> Addr
    {
        Addr {
            ch: (die % self.channels) as u16,
            lun: ((die / self.channels) % self.luns_per_channel) as u16,
            ..Addr::default()
        }
    }

    /// Flattened index of the die holding `addr`.
    pub fn die_index(&self, addr: &Addr) -> usize
    {
        addr.lun as usize * self.channels + addr.ch as usize
    }

    pub fn page_bytes(&self) -> usize
    {
        self.sectors_per_page * self.sector_bytes
    }
}


/// Bad-block state of a single plane block.
#[derive(Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockState(pub u8);

impl BlockState {
    pub const GOOD: Self = Self(0);

    pub fn has_factory_bad(&self)     -> bool { self.0 & 0x1 != 0 }
    pub fn has_grown_bad(&self)       -> bool { self.0 & 0x2 != 0 }
    pub fn has_device_reserved(&self) -> bool { self.0 & 0x4 != 0 }
    pub fn has_host_bad(&self)        -> bool { self.0 & 0x8 != 0 }

    /// Any flag, known or not, makes the block unusable.
    pub fn is_good(&self) -> bool
    {
        self.0 == 0
    }
}


/// Bad-block table of one die.
/// Entries are indexed by `blk * planes + pl`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BadBlockTable {
    pub addr: Addr,
    pub blocks: Vec<BlockState>,
}

impl BadBlockTable {
    /// A table with every block good.
    pub fn all_good(addr: Addr, geo: &Geometry) -> Self
    {
        Self {
            addr,
            blocks: vec![BlockState::GOOD; geo.blocks_per_die * geo.planes],
        }
    }

    /// A table with every block marked bad by the host.
    pub fn all_bad(addr: Addr, geo: &Geometry) -> Self
    {
        Self {
            addr,
            blocks: vec![BlockState(0x8); geo.blocks_per_die * geo.planes],
        }
    }

    pub fn mark(&mut self, blk: usize, pl: usize, planes: usize, state: BlockState)
    {
        if let Some(entry) = self.blocks.get_mut(blk * planes + pl) {
            *entry = state;
        }
    }

    pub fn nr_bad(&self) -> usize
    {
        self.blocks.iter().filter(|b| !b.is_good()).count()
    }
}


/// Completion of a raw read. Both fields zero means success.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadResult {
    pub status: u64,
    pub result: u32,
}

impl ReadResult {
    pub const OK: Self = Self { status: 0, result: 0 };

    pub fn error(status: u64) -> Self
    {
        Self { status, result: 0 }
    }

    pub fn is_ok(&self) -> bool
    {
        self.status == 0 && self.result == 0
    }

    pub fn into_result(self, addr: &Addr) -> Result<()>
    {
        if self.is_ok() {
            return Ok(());
        }

        Err(Error::DeviceRead {
            addr: addr.to_string(),
            status: self.status,
            result: self.result,
        })
    }
}


/// Raw access to an Open-Channel device.
pub trait Device {
    fn geometry(&self) -> &Geometry;

    /// Fetches the bad-block table of the die holding `die`.
    fn bad_block_table(&mut self, die: Addr) -> Result<BadBlockTable>;

    /// Reads `buf.len()` bytes starting at the sector `addr`.
    fn read_raw(&mut self, addr: Addr, buf: &mut [u8]) -> ReadResult;

    /// Allocates a zeroed read buffer, rounded up to whole sectors.
    fn alloc_buffer(&self, len: usize) -> Result<Vec<u8>>
    {
        let sector = self.geometry().sector_bytes.max(1);
        let len = len.div_ceil(sector) * sector;

        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| Error::AllocationFailure { len })?;
        buf.resize(len, 0);

        Ok(buf)
    }
}


// Debug and Display implementations.


impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        write!(
            f,
            "(ch: {:02}, lun: {:02}, pl: {}, blk: {:04}, pg: {:03}, sec: {})",
            self.ch, self.lun, self.pl, self.blk, self.pg, self.sec
        )
    }
}


impl std::fmt::Debug for BlockState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        let mut flags: Vec<&str> = Vec::new();

        if self.has_factory_bad() {
            flags.push("factory_bad");
        }
        if self.has_grown_bad() {
            flags.push("grown_bad");
        }
        if self.has_device_reserved() {
            flags.push("device_reserved");
        }
        if self.has_host_bad() {
            flags.push("host_bad");
        }

        f.debug_struct("BlockState")
            .field("valid", &flags)
            .field("invalid", &(self.0 >> 4))
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn geo() -> Geometry
    {
        Geometry {
            channels: 2,
            luns_per_channel: 4,
            planes: 2,
            blocks_per_die: 16,
            pages_per_block: 8,
            sectors_per_page: 4,
            sector_bytes: 512,
        }
    }

    #[test]
    fn die_addr_channel_fastest()
    {
        let geo = geo();

        assert_eq!(geo.die_addr(0), Addr { ch: 0, lun: 0, ..Addr::default() });
        assert_eq!(geo.die_addr(1), Addr { ch: 1, lun: 0, ..Addr::default() });
        assert_eq!(geo.die_addr(2), Addr { ch: 0, lun: 1, ..Addr::default() });
        assert_eq!(geo.die_addr(7), Addr { ch: 1, lun: 3, ..Addr::default() });

        for die in 0..geo.total_dies() {
            assert_eq!(geo.die_index(&geo.die_addr(die)), die);
        }
    }

    #[test]
    fn validate_rejects_zero_dimensions()
    {
        let mut g = geo();
        assert!(g.validate().is_ok());

        g.planes = 0;
        assert!(matches!(g.validate(), Err(Error::InvalidArgument(_))));

        let mut g = geo();
        g.sector_bytes = 0;
        assert!(matches!(g.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn validate_bounds_address_fields_only()
    {
        let mut g = geo();
        g.sector_bytes = 1 << 20;
        assert!(g.validate().is_ok());

        g.blocks_per_die = 1 << 17;
        assert!(matches!(g.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn block_state_flags()
    {
        assert!(BlockState::GOOD.is_good());
        assert!(BlockState(0x1).has_factory_bad());
        assert!(BlockState(0x2).has_grown_bad());
        assert!(!BlockState(0x2).is_good());
        // Unknown flags are still bad.
        assert!(!BlockState(0x40).is_good());
    }

    #[test]
    fn mark_uses_plane_stride()
    {
        let geo = geo();
        let mut bbt = BadBlockTable::all_good(Addr::default(), &geo);

        bbt.mark(3, 1, geo.planes, BlockState(0x2));

        assert_eq!(bbt.nr_bad(), 1);
        assert!(!bbt.blocks[7].is_good());
    }

    #[test]
    fn read_result_ok()
    {
        assert!(ReadResult::OK.is_ok());
        assert!(!ReadResult::error(STATUS_EMPTY_PAGE).is_ok());
        assert!(!ReadResult { status: 0, result: 1 }.is_ok());
        assert!(ReadResult::error(STATUS_UNRECOVERED)
            .into_result(&Addr::default())
            .is_err());
    }

    #[test]
    fn alloc_buffer_rounds_to_sectors()
    {
        let dev = mem::MemDevice::new(geo());

        let buf = dev.alloc_buffer(700).unwrap();

        assert_eq!(buf.len(), 1024);
        assert!(buf.iter().all(|&b| b == 0));
    }
}
