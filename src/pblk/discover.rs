use serde::Serialize;

use crate::device::{Addr, Device};
use crate::error::Result;
use crate::Context;
use super::meta::{decode_smeta, validate_first_smeta};


/// A pblk instance found on the device.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct InstanceDesc {
    pub die_range_begin: usize,
    pub die_range_end: usize,
    pub die_count: usize,
    /// Where the first smeta of the instance was found.
    pub anchor: Addr,
    pub uuid: [u8; 16],
}


/// Probes block 0 of every die for the first smeta of an instance.
///
/// Bad-block tables are not consulted, so an instance whose anchor die has
/// failed goes unnoticed. Instances are assumed not to share a channel: the
/// range starts at the channel of the anchor.
pub fn discover_instances<D: Device>(ctx: &mut Context<D>) -> Result<Vec<InstanceDesc>>
{
    let geo = *ctx.device.geometry();
    geo.validate()?;

    let tdies = geo.total_dies();
    let mut buf = ctx.device.alloc_buffer(geo.sector_bytes)?;
    let mut instances = Vec::new();

    for die in 0..tdies {
        ctx.logger.status("probe", die, tdies);

        let addr = geo.die_addr(die);

        buf.fill(0);
        if let Err(e) = ctx.device.read_raw(addr, &mut buf).into_result(&addr) {
            ctx.logger.logln(2, &format!("die {:04}: {}", die, e));
            continue;
        }

        let smeta = match decode_smeta(&buf) {
            Ok(v) => v,
            Err(e) => {
                ctx.logger.logln(2, &format!("die {:04}: {}", die, e));
                continue;
            }
        };

        if !validate_first_smeta(&smeta) {
            ctx.logger.logln(2, &format!("die {:04}: no instance anchor", die));
            continue;
        }

        let width = smeta.window_wr_lun as usize;
        let begin = addr.ch as usize;

        if width == 0 || begin + width > tdies {
            ctx.logger.warn(&format!(
                "die {:04}: anchor spans {} dies from die {}, device has {}; ignored",
                die, width, begin, tdies
            ));
            continue;
        }

        let desc = InstanceDesc {
            die_range_begin: begin,
            die_range_end: begin + width - 1,
            die_count: width,
            anchor: addr,
            uuid: smeta.header.uuid,
        };

        ctx.logger.logln(1, &format!(
            "instance {}: dies {}..={} (anchor {})",
            instances.len(), desc.die_range_begin, desc.die_range_end, addr
        ));

        instances.push(desc);
    }

    Ok(instances)
}
