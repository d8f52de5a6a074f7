use std::io::{self, Write};
use serde::Serialize;

use crate::device::Addr;
use super::check::{check_shallow, integrity, Consistency, Finding, Summary};
use super::discover::InstanceDesc;
use super::meta::{EMeta, LineHeader, SMeta};
use super::scan::{Instance, Line, LineState, ReadOutcome};


/// A line with its verdicts, as reported.
#[derive(Debug, Serialize)]
pub struct LineReport<'a> {
    #[serde(flatten)]
    pub line: &'a Line,
    /// Only closed lines get a verdict.
    pub consistency: Option<Consistency>,
    pub findings: Vec<Finding>,
}

impl<'a> LineReport<'a> {
    pub fn new(line: &'a Line) -> Self
    {
        let consistency = match line.state {
            LineState::Closed => Some(check_shallow(line)),
            _ => None,
        };

        Self {
            line,
            consistency,
            findings: integrity(line),
        }
    }
}


/// An instance with its verdicts, as reported.
#[derive(Debug, Serialize)]
pub struct InstanceReport<'a> {
    pub die_range_begin: usize,
    pub die_range_end: usize,
    pub die_count: usize,
    pub bad_blocks: usize,
    pub summary: Summary,
    pub lines: Vec<LineReport<'a>>,
}

impl<'a> InstanceReport<'a> {
    pub fn new(instance: &'a Instance) -> Self
    {
        Self {
            die_range_begin: instance.die_range_begin,
            die_range_end: instance.die_range_end,
            die_count: instance.die_count,
            bad_blocks: instance.bbts.iter().map(|b| b.nr_bad()).sum(),
            summary: Summary::of(instance),
            lines: instance.lines.iter().map(LineReport::new).collect(),
        }
    }
}


/// Writes the full record of a line.
pub fn write_line<W: Write>(w: &mut W, report: &LineReport) -> io::Result<()>
{
    let line = report.line;

    writeln!(w, "line_{:04}:", line.id)?;
    writeln!(w, "  id: {:04}", line.id)?;
    writeln!(w, "  state: {}", line.state)?;
    match report.consistency {
        Some(c) => writeln!(w, "  consistency: {}", c)?,
        None => writeln!(w, "  consistency: ~")?,
    }
    writeln!(w, "  smeta_addr: {}", OptAddr(line.smeta_addr))?;
    writeln!(w, "  emeta_addr: {}", OptAddr(line.emeta_addr))?;
    writeln!(w, "  smeta_nvm_ret: {}", line.smeta_result)?;
    writeln!(w, "  emeta_nvm_ret: {}", line.emeta_result)?;

    if report.findings.is_empty() {
        writeln!(w, "  findings: ~")?;
    } else {
        writeln!(w, "  findings:")?;
        for finding in &report.findings {
            writeln!(w, "    - {}", finding)?;
        }
    }

    if let Some(smeta) = &line.smeta {
        write!(w, "line{:04}_", line.id)?;
        write_smeta(w, smeta)?;
    }
    if let Some(emeta) = &line.emeta {
        write!(w, "line{:04}_", line.id)?;
        write_emeta(w, emeta)?;
    }

    Ok(())
}


/// Writes one line of output per line.
pub fn write_brief<W: Write>(w: &mut W, report: &LineReport) -> io::Result<()>
{
    let line = report.line;

    write!(w, "line_{:04}: {:<10}", line.id, line.state.to_string())?;
    match report.consistency {
        Some(c) => write!(w, " {:<10}", c.to_string())?,
        None => write!(w, " {:<10}", "~")?,
    }
    if let Some(smeta) = &line.smeta {
        write!(w, " seq_nr: {}", smeta.seq_nr)?;
    }
    // Skipped and successful reads say nothing.
    for (name, outcome) in [("smeta", line.smeta_result), ("emeta", line.emeta_result)] {
        if !matches!(outcome, ReadOutcome::Ok | ReadOutcome::NotAttempted) {
            write!(w, " {}_nvm_ret: {}", name, outcome)?;
        }
    }
    if !report.findings.is_empty() {
        write!(w, " findings: {}", report.findings.len())?;
    }

    writeln!(w)
}


pub fn write_header<W: Write>(w: &mut W, header: &LineHeader) -> io::Result<()>
{
    writeln!(w, "  header:")?;
    writeln!(w, "    crc: {:#010x}", header.crc)?;
    writeln!(w, "    identifier: {:#010x}", header.identifier)?;
    writeln!(w, "    uuid: {}", Uuid(&header.uuid))?;
    match header.line_type() {
        Some(t) => writeln!(w, "    type: {}", t)?,
        None => writeln!(w, "    type: PBLK_LINETYPE_INVALID ({})", header.line_type)?,
    }
    writeln!(w, "    version: {:02x}", header.version)?;
    writeln!(w, "    id: {:04}", header.id)
}


pub fn write_smeta<W: Write>(w: &mut W, smeta: &SMeta) -> io::Result<()>
{
    writeln!(w, "smeta:")?;
    write_header(w, &smeta.header)?;
    writeln!(w, "  crc: {:#010x}", smeta.crc)?;
    writeln!(w, "  prev_id: {}", LineId(smeta.prev_id))?;
    writeln!(w, "  seq_nr: {:04}", smeta.seq_nr)?;
    writeln!(w, "  window_wr_lun: {:08}", smeta.window_wr_lun)
}


pub fn write_emeta<W: Write>(w: &mut W, emeta: &EMeta) -> io::Result<()>
{
    writeln!(w, "emeta:")?;
    write_header(w, &emeta.header)?;
    writeln!(w, "  crc: {:#010x}", emeta.crc)?;
    writeln!(w, "  prev_id: {}", LineId(emeta.prev_id))?;
    writeln!(w, "  seq_nr: {:04}", emeta.seq_nr)?;
    writeln!(w, "  window_wr_lun: {:08}", emeta.window_wr_lun)?;
    writeln!(w, "  next_id: {}", LineId(emeta.next_id))?;
    writeln!(w, "  nr_lbas: {:04}", emeta.nr_lbas)
}


pub fn write_instance_desc<W: Write>(w: &mut W, idx: usize, desc: &InstanceDesc) -> io::Result<()>
{
    writeln!(w, "instance_{:02}:", idx)?;
    writeln!(w, "  dies: {}..={}", desc.die_range_begin, desc.die_range_end)?;
    writeln!(w, "  die_count: {}", desc.die_count)?;
    writeln!(w, "  anchor: {}", desc.anchor)?;
    writeln!(w, "  uuid: {}", Uuid(&desc.uuid))
}


pub fn write_summary<W: Write>(w: &mut W, sum: &Summary) -> io::Result<()>
{
    writeln!(w, "summary:")?;
    writeln!(w, "  lines: {}", sum.lines)?;
    writeln!(w, "  closed: {} ({} consistent, {} divergent)", sum.closed, sum.consistent, sum.divergent)?;
    writeln!(w, "  open: {}", sum.open)?;
    writeln!(w, "  bad: {}", sum.bad)?;
    writeln!(w, "  unknown: {}", sum.unknown)?;
    writeln!(w, "  emeta_only: {}", sum.emeta_only)?;
    writeln!(w, "  read_errors: {}", sum.read_errors)?;
    writeln!(w, "  truncated: {}", sum.truncated)?;
    writeln!(w, "  findings: {}", sum.findings)
}


struct OptAddr(Option<Addr>);

struct LineId(u32);

struct Uuid<'a>(&'a [u8; 16]);


// Debug and Display implementations.


impl std::fmt::Display for LineState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        match self {
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::Bad => write!(f, "BAD"),
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
            Self::EmetaOnly => write!(f, "EMETA_ONLY"),
        }
    }
}


impl std::fmt::Display for Consistency {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        match self {
            Self::Consistent => write!(f, "consistent"),
            Self::Divergent => write!(f, "divergent"),
        }
    }
}


impl std::fmt::Display for ReadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        match self {
            Self::Ok => write!(f, "~"),
            Self::NotAttempted => write!(f, "not attempted"),
            Self::DeviceError { status, result } =>
                write!(f, "{{ status: {:#x}, result: {:#x} }}", status, result),
            Self::Truncated { needed, available } =>
                write!(f, "truncated ({} bytes needed, {} read)", needed, available),
        }
    }
}


impl std::fmt::Display for OptAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        match &self.0 {
            Some(addr) => write!(f, "{}", addr),
            None => write!(f, "~"),
        }
    }
}


impl std::fmt::Display for LineId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        if self.0 == super::meta::NONE_ID {
            write!(f, "none")
        } else {
            write!(f, "{:04}", self.0)
        }
    }
}


impl std::fmt::Display for Uuid<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{:02x}", b)?;
        }

        Ok(())
    }
}
