use std::collections::{HashMap, HashSet};

use super::{
    Addr,
    BadBlockTable,
    Device,
    Geometry,
    ReadResult,
    STATUS_EMPTY_PAGE,
    STATUS_UNRECOVERED,
};
use crate::error::{Error, Result};


/// In-memory device for tests.
/// Pages not written read back as empty; every read is recorded.
#[derive(Debug)]
pub struct MemDevice {
    pub geo: Geometry,
    pub bbts: Vec<BadBlockTable>,
    pub pages: HashMap<Addr, Vec<u8>>,
    pub failing: HashMap<Addr, ReadResult>,
    pub bbt_failing: HashSet<usize>,
    pub reads: Vec<Addr>,
}

impl MemDevice {
    pub fn new(geo: Geometry) -> Self
    {
        let bbts = (0..geo.total_dies())
            .map(|die| BadBlockTable::all_good(geo.die_addr(die), &geo))
            .collect();

        Self {
            geo,
            bbts,
            pages: HashMap::new(),
            failing: HashMap::new(),
            bbt_failing: HashSet::new(),
            reads: Vec::new(),
        }
    }

    pub fn write(&mut self, addr: Addr, data: Vec<u8>)
    {
        self.pages.insert(addr, data);
    }

    pub fn fail(&mut self, addr: Addr)
    {
        self.failing.insert(addr, ReadResult::error(STATUS_UNRECOVERED));
    }

    pub fn mark_bad(&mut self, die: usize, blk: usize, pl: usize)
    {
        let planes = self.geo.planes;
        self.bbts[die].mark(blk, pl, planes, super::BlockState(0x1));
    }

    pub fn was_read(&self, addr: &Addr) -> bool
    {
        self.reads.contains(addr)
    }
}

impl Device for MemDevice {
    fn geometry(&self) -> &Geometry
    {
        &self.geo
    }

    fn bad_block_table(&mut self, die: Addr) -> Result<BadBlockTable>
    {
        let idx = self.geo.die_index(&die);

        if self.bbt_failing.contains(&idx) {
            return Err(Error::BadBlockTable {
                addr: die.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        self.bbts.get(idx).cloned().ok_or_else(|| Error::BadBlockTable {
            addr: die.to_string(),
            reason: "no such die".to_string(),
        })
    }

    fn read_raw(&mut self, addr: Addr, buf: &mut [u8]) -> ReadResult
    {
        self.reads.push(addr);

        if let Some(res) = self.failing.get(&addr) {
            return *res;
        }

        match self.pages.get(&addr) {
            Some(data) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                ReadResult::OK
            }
            None => ReadResult::error(STATUS_EMPTY_PAGE),
        }
    }
}
