use serde::Serialize;

use crate::device::{Addr, BadBlockTable, Device, ReadResult};
use crate::error::{Error, Result};
use crate::Context;
use super::meta::{decode_emeta, decode_smeta, EMeta, SMeta};
use super::resolve::{resolve_emeta_addr, resolve_smeta_addr};


/// Line state, derived once all reads of a scan are done.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineState {
    /// Not classified, or neither meta data page could be read.
    Unknown,
    /// No die of the stripe can hold the meta data.
    Bad,
    /// smeta read, emeta not.
    Open,
    /// smeta and emeta read.
    Closed,
    /// emeta read without smeta. Should never happen.
    EmetaOnly,
}


/// Outcome of reading one meta data page.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReadOutcome {
    NotAttempted,
    Ok,
    DeviceError { status: u64, result: u32 },
    Truncated { needed: usize, available: usize },
}

impl ReadOutcome {
    pub fn is_ok(&self) -> bool
    {
        *self == Self::Ok
    }

    fn from_decode_error(e: &Error, buf_len: usize) -> Self
    {
        match e {
            Error::TruncatedBuffer { needed, available } => Self::Truncated {
                needed: *needed,
                available: *available,
            },
            _ => Self::Truncated { needed: usize::MAX, available: buf_len },
        }
    }
}

impl From<ReadResult> for ReadOutcome {
    fn from(res: ReadResult) -> Self
    {
        if res.is_ok() {
            Self::Ok
        } else {
            Self::DeviceError { status: res.status, result: res.result }
        }
    }
}


/// One line of an instance.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Line {
    pub id: u32,
    pub state: LineState,
    pub smeta_addr: Option<Addr>,
    pub emeta_addr: Option<Addr>,
    pub smeta_result: ReadOutcome,
    pub emeta_result: ReadOutcome,
    pub smeta: Option<SMeta>,
    pub emeta: Option<EMeta>,
}

impl Line {
    pub fn new(id: u32) -> Self
    {
        Self {
            id,
            state: LineState::Unknown,
            smeta_addr: None,
            emeta_addr: None,
            smeta_result: ReadOutcome::NotAttempted,
            emeta_result: ReadOutcome::NotAttempted,
            smeta: None,
            emeta: None,
        }
    }

    pub fn is_resolved(&self) -> bool
    {
        self.smeta_addr.is_some() && self.emeta_addr.is_some()
    }

    pub fn classify(&mut self)
    {
        self.state = classify(self);
    }
}


/// Derives the state of a line from its addresses and read outcomes.
pub fn classify(line: &Line) -> LineState
{
    if !line.is_resolved() {
        return LineState::Bad;
    }

    match (line.smeta_result.is_ok(), line.emeta_result.is_ok()) {
        (true, true) => LineState::Closed,
        (true, false) => LineState::Open,
        (false, true) => LineState::EmetaOnly,
        (false, false) => LineState::Unknown,
    }
}


/// A scanned pblk instance.
#[derive(Debug, Serialize)]
pub struct Instance {
    pub die_range_begin: usize,
    pub die_range_end: usize,
    pub die_count: usize,
    #[serde(skip)]
    pub bbts: Vec<BadBlockTable>,
    pub lines: Vec<Line>,
}


/// Scans the meta data of every line striped over the dies `begin..=end`.
pub fn scan_instance<D: Device>(ctx: &mut Context<D>, begin: usize, end: usize) -> Result<Instance>
{
    let geo = *ctx.device.geometry();
    geo.validate()?;

    if begin > end || end >= geo.total_dies() {
        return Err(Error::InvalidArgument(format!(
            "die range {}..={} is not within the {} dies of the device",
            begin, end, geo.total_dies()
        )));
    }

    let tdies = end - begin + 1;
    let nlines = geo.lines();

    ctx.logger.logln(1, &format!("scanning {} lines over dies {}..={}", nlines, begin, end));

    let mut smeta_buf = ctx.device.alloc_buffer(geo.sector_bytes)?;
    let mut emeta_buf = ctx.device.alloc_buffer(geo.page_bytes() * geo.planes)?;

    // Retrieve the bad-block tables, in stripe order.

    let mut bbts: Vec<BadBlockTable> = Vec::new();
    bbts.try_reserve_exact(tdies)
        .map_err(|_| Error::AllocationFailure { len: tdies * std::mem::size_of::<BadBlockTable>() })?;

    for (i, die) in (begin..=end).enumerate() {
        ctx.logger.status("bbt_get", i, tdies);

        let addr = geo.die_addr(die);
        let bbt = match ctx.device.bad_block_table(addr) {
            Ok(v) => v,
            Err(e) => {
                ctx.logger.warn(&format!("{}; treating die {} as bad", e, die));
                BadBlockTable::all_bad(addr, &geo)
            }
        };

        bbts.push(bbt);
    }

    // Resolve the meta data addresses of every line.

    let mut lines: Vec<Line> = Vec::new();
    lines.try_reserve_exact(nlines)
        .map_err(|_| Error::AllocationFailure { len: nlines * std::mem::size_of::<Line>() })?;

    for i in 0..nlines {
        ctx.logger.status("line_setup", i, nlines);

        let mut line = Line::new(i as u32);

        match resolve_smeta_addr(line.id, &geo, &bbts) {
            Ok(addr) => line.smeta_addr = Some(addr),
            Err(e) => ctx.logger.logln(2, &e.to_string()),
        }
        match resolve_emeta_addr(line.id, &geo, &bbts) {
            Ok(addr) => line.emeta_addr = Some(addr),
            Err(e) => ctx.logger.logln(2, &e.to_string()),
        }

        // Unresolvable lines are never read.
        if !line.is_resolved() {
            line.state = LineState::Bad;
        }

        lines.push(line);
    }

    // Read smeta, then emeta, of every line.

    for (i, line) in lines.iter_mut().enumerate() {
        ctx.logger.status("smeta_read", i, nlines);

        if let (Some(addr), true) = (line.smeta_addr, line.is_resolved()) {
            smeta_buf.fill(0);
            line.smeta_result = ctx.device.read_raw(addr, &mut smeta_buf).into();

            if line.smeta_result.is_ok() {
                match decode_smeta(&smeta_buf) {
                    Ok(v) => line.smeta = Some(v),
                    Err(e) => line.smeta_result = ReadOutcome::from_decode_error(&e, smeta_buf.len()),
                }
            }
        }
    }

    for (i, line) in lines.iter_mut().enumerate() {
        ctx.logger.status("emeta_read", i, nlines);

        if let (Some(addr), true) = (line.emeta_addr, line.is_resolved()) {
            emeta_buf.fill(0);
            line.emeta_result = ctx.device.read_raw(addr, &mut emeta_buf).into();

            if line.emeta_result.is_ok() {
                match decode_emeta(&emeta_buf) {
                    Ok(v) => line.emeta = Some(v),
                    Err(e) => line.emeta_result = ReadOutcome::from_decode_error(&e, emeta_buf.len()),
                }
            }
        }
    }

    for line in &mut lines {
        line.classify();
        ctx.logger.logln(2, &format!("line {:04}: {:?}", line.id, line.state));
    }

    Ok(Instance {
        die_range_begin: begin,
        die_range_end: end,
        die_count: tdies,
        bbts,
        lines,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mem::MemDevice;
    use crate::device::STATUS_UNRECOVERED;
    use crate::logger::Logger;
    use crate::pblk::check::{check_shallow, Consistency};
    use crate::pblk::fixtures;
    use crate::pblk::meta::NONE_ID;
    use crate::Config;

    fn context(dev: MemDevice) -> Context<MemDevice>
    {
        Context {
            device: dev,
            logger: Logger::new(None, &Config::default()),
        }
    }

    fn smeta_addr(die: u16, blk: u16) -> Addr
    {
        Addr { ch: die, blk, ..Addr::default() }
    }

    fn emeta_addr(die: u16, blk: u16) -> Addr
    {
        Addr { ch: die, blk, pg: 7, ..Addr::default() }
    }

    mod state_machine {
        use super::*;

        fn resolved(id: u32) -> Line
        {
            let mut line = Line::new(id);
            line.smeta_addr = Some(smeta_addr(0, id as u16));
            line.emeta_addr = Some(emeta_addr(0, id as u16));
            line
        }

        #[test]
        fn unresolved_is_bad()
        {
            let mut line = resolved(0);
            line.emeta_addr = None;
            line.smeta_result = ReadOutcome::Ok;
            line.emeta_result = ReadOutcome::Ok;

            assert_eq!(classify(&line), LineState::Bad);
        }

        #[test]
        fn read_outcomes()
        {
            let err = ReadOutcome::DeviceError { status: STATUS_UNRECOVERED, result: 0 };
            let cases = [
                (ReadOutcome::Ok, ReadOutcome::Ok, LineState::Closed),
                (ReadOutcome::Ok, err, LineState::Open),
                (err, ReadOutcome::Ok, LineState::EmetaOnly),
                (err, err, LineState::Unknown),
                (ReadOutcome::Ok, ReadOutcome::Truncated { needed: 9000, available: 4096 }, LineState::Open),
            ];

            for (smeta, emeta, state) in cases {
                let mut line = resolved(1);
                line.smeta_result = smeta;
                line.emeta_result = emeta;
                line.classify();

                assert_eq!(line.state, state);
            }
        }

        #[test]
        fn new_line_is_unknown()
        {
            let line = Line::new(3);

            assert_eq!(line.state, LineState::Unknown);
            assert_eq!(line.smeta_result, ReadOutcome::NotAttempted);
            assert_eq!(line.emeta_result, ReadOutcome::NotAttempted);
        }
    }

    #[test]
    fn closed_line_is_consistent()
    {
        let mut dev = MemDevice::new(fixtures::geometry(4, 16));
        let smeta = fixtures::smeta(0, NONE_ID, 5, 4);
        let emeta = fixtures::emeta(0, NONE_ID, 5, 4, 1, &[100, 101]);
        fixtures::write_line(&mut dev, 0, &smeta, Some(&emeta));
        let mut ctx = context(dev);

        let inst = scan_instance(&mut ctx, 0, 3).unwrap();

        assert_eq!(inst.die_count, 4);
        assert_eq!(inst.lines.len(), 16);

        let line = &inst.lines[0];
        assert_eq!(line.state, LineState::Closed);
        assert_eq!(line.smeta_addr, Some(smeta_addr(0, 0)));
        assert_eq!(line.emeta_addr, Some(emeta_addr(0, 0)));
        assert_eq!(line.smeta, Some(smeta));
        assert_eq!(line.emeta, Some(emeta));
        assert_eq!(check_shallow(line), Consistency::Consistent);

        // Nothing else was written.
        assert!(inst.lines[1..].iter().all(|l| l.state == LineState::Unknown));
    }

    #[test]
    fn bad_block_moves_meta_to_next_die()
    {
        let mut dev = MemDevice::new(fixtures::geometry(4, 16));
        dev.mark_bad(0, 0, 0);
        let smeta = fixtures::smeta(0, NONE_ID, 5, 4);
        let emeta = fixtures::emeta(0, NONE_ID, 5, 4, 1, &[]);
        fixtures::write_line(&mut dev, 1, &smeta, Some(&emeta));
        let mut ctx = context(dev);

        let inst = scan_instance(&mut ctx, 0, 3).unwrap();

        assert_eq!(inst.lines[0].smeta_addr, Some(smeta_addr(1, 0)));
        assert_eq!(inst.lines[0].emeta_addr, Some(emeta_addr(1, 0)));
        assert_eq!(inst.lines[0].state, LineState::Closed);
        assert_eq!(inst.lines[1].smeta_addr, Some(smeta_addr(0, 1)));
    }

    #[test]
    fn bad_line_is_never_read()
    {
        let mut dev = MemDevice::new(fixtures::geometry(4, 16));
        for die in 0..4 {
            dev.mark_bad(die, 2, 0);
        }
        let mut ctx = context(dev);

        let inst = scan_instance(&mut ctx, 0, 3).unwrap();
        let line = &inst.lines[2];

        assert_eq!(line.state, LineState::Bad);
        assert_eq!(line.smeta_addr, None);
        assert_eq!(line.emeta_addr, None);
        assert_eq!(line.smeta_result, ReadOutcome::NotAttempted);
        assert_eq!(line.emeta_result, ReadOutcome::NotAttempted);
        assert!(ctx.device.reads.iter().all(|a| a.blk != 2));
        // Every other line got both of its reads.
        assert_eq!(ctx.device.reads.len(), 15 * 2);
    }

    #[test]
    fn emeta_read_error_leaves_line_open()
    {
        let mut dev = MemDevice::new(fixtures::geometry(4, 16));
        let emeta = fixtures::emeta(0, NONE_ID, 5, 4, 1, &[]);
        fixtures::write_line(&mut dev, 0, &fixtures::smeta(0, NONE_ID, 5, 4), Some(&emeta));
        fixtures::write_line(
            &mut dev, 0,
            &fixtures::smeta(1, 0, 6, 4),
            Some(&fixtures::emeta(1, 0, 6, 4, NONE_ID, &[])),
        );
        dev.fail(emeta_addr(0, 0));
        let mut ctx = context(dev);

        let inst = scan_instance(&mut ctx, 0, 3).unwrap();

        let line = &inst.lines[0];
        assert_eq!(line.state, LineState::Open);
        assert_eq!(line.emeta_result, ReadOutcome::DeviceError { status: STATUS_UNRECOVERED, result: 0 });
        assert_eq!(line.emeta, None);
        assert_eq!(check_shallow(line), Consistency::Divergent);

        assert_eq!(inst.lines[1].state, LineState::Closed);
    }

    #[test]
    fn emeta_without_smeta_is_flagged()
    {
        let mut dev = MemDevice::new(fixtures::geometry(2, 4));
        dev.write(emeta_addr(0, 1), fixtures::emeta(1, 0, 1, 2, NONE_ID, &[]).encode().unwrap());
        let mut ctx = context(dev);

        let inst = scan_instance(&mut ctx, 0, 1).unwrap();

        assert_eq!(inst.lines[1].state, LineState::EmetaOnly);
        assert!(matches!(inst.lines[1].smeta_result, ReadOutcome::DeviceError { .. }));
    }

    #[test]
    fn truncated_emeta_counts_as_failed_read()
    {
        let mut dev = MemDevice::new(fixtures::geometry(2, 4));
        let mut emeta = fixtures::emeta(0, NONE_ID, 0, 2, NONE_ID, &[]);
        emeta.nr_lbas = 1 << 20;
        fixtures::write_line(&mut dev, 0, &fixtures::first_smeta(2), Some(&emeta));
        let mut ctx = context(dev);

        let inst = scan_instance(&mut ctx, 0, 1).unwrap();
        let line = &inst.lines[0];

        assert_eq!(line.state, LineState::Open);
        assert_eq!(
            line.emeta_result,
            ReadOutcome::Truncated { needed: 64 + (8 << 20), available: 4096 }
        );
    }

    #[test]
    fn stale_data_does_not_leak_between_reads()
    {
        let mut dev = MemDevice::new(fixtures::geometry(2, 4));
        fixtures::write_line(&mut dev, 0, &fixtures::first_smeta(2), None);
        // A short read only fills the first bytes of the buffer.
        dev.write(smeta_addr(0, 1), vec![0x11; 8]);
        let mut ctx = context(dev);

        let inst = scan_instance(&mut ctx, 0, 1).unwrap();
        let smeta = inst.lines[1].smeta.unwrap();

        assert_eq!(smeta.header.identifier, 0x11111111);
        assert_eq!(smeta.header.uuid, [0; 16]);
        assert_eq!(smeta.window_wr_lun, 0);
    }

    #[test]
    fn scans_only_the_given_range()
    {
        let mut dev = MemDevice::new(fixtures::geometry(4, 4));
        for die in 0..2 {
            dev.mark_bad(die, 0, 0);
        }
        let mut ctx = context(dev);

        let inst = scan_instance(&mut ctx, 2, 3).unwrap();

        assert_eq!(inst.bbts.len(), 2);
        assert_eq!(inst.bbts[0].addr, Addr { ch: 2, ..Addr::default() });
        assert_eq!(inst.lines[0].smeta_addr, Some(smeta_addr(2, 0)));
    }

    #[test]
    fn failed_bbt_makes_die_unusable()
    {
        let mut dev = MemDevice::new(fixtures::geometry(2, 4));
        dev.bbt_failing.insert(0);
        let mut ctx = context(dev);

        let inst = scan_instance(&mut ctx, 0, 1).unwrap();

        assert!(inst.lines.iter().all(|l| l.smeta_addr.map(|a| a.ch) == Some(1)));
    }

    #[test]
    fn invalid_ranges_are_rejected_before_io()
    {
        let mut ctx = context(MemDevice::new(fixtures::geometry(4, 4)));

        assert!(matches!(scan_instance(&mut ctx, 2, 1), Err(Error::InvalidArgument(_))));
        assert!(matches!(scan_instance(&mut ctx, 0, 4), Err(Error::InvalidArgument(_))));
        assert!(ctx.device.reads.is_empty());
    }
}
