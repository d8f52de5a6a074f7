use std::io::Write;
use anyhow::Context as _;
use serde::Serialize;

use crate::device::Device;
use crate::pblk::report::{self, InstanceReport, LineReport};
use crate::pblk::{discover_instances, scan_instance, InstanceDesc};
use crate::{Command, Config, Context};


/// Exit code of a check that found something to investigate.
pub const EXIT_ANOMALIES: i32 = 2;


/// Runs the configured command, returning the exit code.
pub fn run<D: Device, W: Write>(ctx: &mut Context<D>, cfg: &Config, out: &mut W) -> anyhow::Result<i32>
{
    match cfg.command {
        Command::MetaDump => meta_dump(ctx, cfg, out),
        Command::Discover => discover(ctx, cfg, out),
        Command::Check => check(ctx, cfg, out),
    }
}


/// Dumps every line of a die range, without any discovery.
fn meta_dump<D: Device, W: Write>(ctx: &mut Context<D>, cfg: &Config, out: &mut W) -> anyhow::Result<i32>
{
    let tdies = ctx.device.geometry().total_dies();
    let begin = cfg.begin.unwrap_or(0);
    let end = cfg.end.unwrap_or_else(|| tdies.saturating_sub(1));

    let instance = scan_instance(ctx, begin, end)
        .with_context(|| format!("couldn't scan dies {}..={}", begin, end))?;
    let report = InstanceReport::new(&instance);

    if cfg.json {
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
        return Ok(0);
    }

    write_lines(out, &report.lines, cfg.brief)?;
    report::write_summary(out, &report.summary)?;

    Ok(0)
}


fn discover<D: Device, W: Write>(ctx: &mut Context<D>, cfg: &Config, out: &mut W) -> anyhow::Result<i32>
{
    let instances = discover_instances(ctx).context("instance discovery failed")?;

    if cfg.json {
        serde_json::to_writer_pretty(&mut *out, &instances)?;
        writeln!(out)?;
        return Ok(0);
    }

    for (i, desc) in instances.iter().enumerate() {
        report::write_instance_desc(out, i, desc)?;
    }

    Ok(0)
}


#[derive(Serialize)]
struct CheckedInstance<'a> {
    instance: &'a InstanceDesc,
    report: InstanceReport<'a>,
}


/// Discovers every instance, then scans and verifies it.
fn check<D: Device, W: Write>(ctx: &mut Context<D>, cfg: &Config, out: &mut W) -> anyhow::Result<i32>
{
    let instances = discover_instances(ctx).context("instance discovery failed")?;

    if instances.is_empty() {
        ctx.logger.logln(0, "no pblk instance found");
        return Ok(1);
    }

    let mut scanned = Vec::with_capacity(instances.len());

    for desc in &instances {
        let instance = scan_instance(ctx, desc.die_range_begin, desc.die_range_end)
            .with_context(|| format!(
                "couldn't scan the instance on dies {}..={}",
                desc.die_range_begin, desc.die_range_end
            ))?;
        scanned.push(instance);
    }

    let checked: Vec<CheckedInstance> = instances.iter()
        .zip(&scanned)
        .map(|(desc, inst)| CheckedInstance { instance: desc, report: InstanceReport::new(inst) })
        .collect();

    let anomalies = checked.iter().any(|c| c.report.summary.has_anomalies());

    if cfg.json {
        serde_json::to_writer_pretty(&mut *out, &checked)?;
        writeln!(out)?;
    } else {
        for (i, c) in checked.iter().enumerate() {
            report::write_instance_desc(out, i, c.instance)?;
            write_lines(out, &c.report.lines, cfg.brief)?;
            report::write_summary(out, &c.report.summary)?;
        }
    }

    if anomalies {
        ctx.logger.logln(1, "anomalies found");
        return Ok(EXIT_ANOMALIES);
    }

    Ok(0)
}


fn write_lines<W: Write>(out: &mut W, lines: &[LineReport], brief: bool) -> std::io::Result<()>
{
    for line in lines {
        if brief {
            report::write_brief(out, line)?;
        } else {
            report::write_line(out, line)?;
        }
    }

    Ok(())
}
