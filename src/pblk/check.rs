use serde::Serialize;

use crate::device::STATUS_EMPTY_PAGE;
use super::meta::{emeta_body_crc, header_crc, smeta_body_crc, LineHeader, SMETA_SIZE};
use super::scan::{Instance, Line, LineState, ReadOutcome};


/// Agreement of a line's smeta and emeta.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    Consistent,
    Divergent,
}


/// Shallow comparison of the smeta and emeta of a line.
///
/// The headers must be identical and both records must agree on `prev_id`
/// and `seq_nr`. A line missing either record is divergent.
pub fn check_shallow(line: &Line) -> Consistency
{
    if !line.smeta_result.is_ok() || !line.emeta_result.is_ok() {
        return Consistency::Divergent;
    }

    let (smeta, emeta) = match (&line.smeta, &line.emeta) {
        (Some(s), Some(e)) => (s, e),
        _ => return Consistency::Divergent,
    };

    let same_header = match (smeta.header.encode(), emeta.header.encode()) {
        (Ok(s), Ok(e)) => s == e,
        _ => false,
    };

    if !same_header
        || smeta.prev_id != emeta.prev_id
        || smeta.seq_nr != emeta.seq_nr
    {
        return Consistency::Divergent;
    }

    Consistency::Consistent
}


/// Which record of a line a finding is about.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Record {
    Smeta,
    Emeta,
}


/// A structural problem found in a decoded record.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    BadIdentifier { record: Record, found: u32 },
    BadVersion { record: Record, found: u16 },
    HeaderCrc { record: Record, stored: u32, computed: u32 },
    BodyCrc { record: Record, stored: u32, computed: u32 },
    InvalidLineType { record: Record, found: u16 },
    LineIdMismatch { record: Record, found: u32 },
}


/// Verifies every decoded record of a line on its own.
/// A record with a foreign identifier gets no further checks.
pub fn integrity(line: &Line) -> Vec<Finding>
{
    let mut findings = Vec::new();

    if let Some(smeta) = &line.smeta {
        let body = smeta_body_crc(smeta, SMETA_SIZE).ok();
        check_record(Record::Smeta, &smeta.header, smeta.crc, body, line.id, &mut findings);
    }

    if let Some(emeta) = &line.emeta {
        let body = emeta_body_crc(emeta, emeta.len()).ok();
        check_record(Record::Emeta, &emeta.header, emeta.crc, body, line.id, &mut findings);
    }

    findings
}


fn check_record(record: Record, header: &LineHeader, stored: u32, computed: Option<u32>, id: u32, out: &mut Vec<Finding>)
{
    if !header.identifier_ok() {
        out.push(Finding::BadIdentifier { record, found: header.identifier });
        return;
    }

    if !header.version_ok() {
        out.push(Finding::BadVersion { record, found: header.version });
    }
    if let Ok(crc) = header_crc(header) {
        if crc != header.crc {
            out.push(Finding::HeaderCrc { record, stored: header.crc, computed: crc });
        }
    }
    if let Some(computed) = computed {
        if stored != computed {
            out.push(Finding::BodyCrc { record, stored, computed });
        }
    }
    if header.line_type().is_none() {
        out.push(Finding::InvalidLineType { record, found: header.line_type });
    }
    if header.id != id {
        out.push(Finding::LineIdMismatch { record, found: header.id });
    }
}


/// Per-instance tally.
#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct Summary {
    pub lines: usize,
    pub unknown: usize,
    pub bad: usize,
    pub open: usize,
    pub closed: usize,
    pub emeta_only: usize,
    /// Closed lines whose smeta and emeta agree.
    pub consistent: usize,
    pub divergent: usize,
    /// Failed reads of pages that were written, counted per record.
    pub read_errors: usize,
    /// Records whose `nr_lbas` runs past the read buffer.
    pub truncated: usize,
    pub findings: usize,
}

impl Summary {
    pub fn of(instance: &Instance) -> Self
    {
        let mut sum = Self::default();

        for line in &instance.lines {
            sum.lines += 1;
            match line.state {
                LineState::Unknown => sum.unknown += 1,
                LineState::Bad => sum.bad += 1,
                LineState::Open => sum.open += 1,
                LineState::Closed => sum.closed += 1,
                LineState::EmetaOnly => sum.emeta_only += 1,
            }

            if line.state == LineState::Closed {
                match check_shallow(line) {
                    Consistency::Consistent => sum.consistent += 1,
                    Consistency::Divergent => sum.divergent += 1,
                }
            }

            for outcome in [line.smeta_result, line.emeta_result] {
                match outcome {
                    ReadOutcome::DeviceError { status, .. } if status != STATUS_EMPTY_PAGE =>
                        sum.read_errors += 1,
                    ReadOutcome::Truncated { .. } => sum.truncated += 1,
                    _ => (),
                }
            }

            sum.findings += integrity(line).len();
        }

        sum
    }

    /// Whether anything calls for investigation.
    pub fn has_anomalies(&self) -> bool
    {
        self.divergent > 0
            || self.emeta_only > 0
            || self.read_errors > 0
            || self.truncated > 0
            || self.findings > 0
    }
}


// Debug and Display implementations.


impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        match self {
            Self::Smeta => write!(f, "smeta"),
            Self::Emeta => write!(f, "emeta"),
        }
    }
}


impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        match self {
            Self::BadIdentifier { record, found } =>
                write!(f, "{}: identifier {:#010x} is not pblk", record, found),
            Self::BadVersion { record, found } =>
                write!(f, "{}: unknown version {}", record, found),
            Self::HeaderCrc { record, stored, computed } =>
                write!(f, "{}: header crc {:#010x}, computed {:#010x}", record, stored, computed),
            Self::BodyCrc { record, stored, computed } =>
                write!(f, "{}: body crc {:#010x}, computed {:#010x}", record, stored, computed),
            Self::InvalidLineType { record, found } =>
                write!(f, "{}: invalid line type {}", record, found),
            Self::LineIdMismatch { record, found } =>
                write!(f, "{}: header names line {}", record, found),
        }
    }
}
