use std::io::Write;
use std::fs::File;

use crate::Config;


/// A simple logger.
#[derive(Debug)]
pub struct Logger {
    verbosity: u32,
    status: bool,
    log_file: Option<File>,
    cmd_name: String,
}

impl Logger {
    /// Create a new logger.
    pub fn new(log_file: Option<File>, cfg: &Config) -> Self
    {
        Self {
            verbosity: cfg.verbosity,
            status: cfg.status,
            log_file,
            cmd_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }

    /// Log a message, with a specified level.
    /// Logs also into the log file, if present.
    pub fn log(&mut self, level: u32, msg: &str)
    {
        if self.verbosity >= level {
            eprint!("{}", msg);

            if let Some(log_file) = &mut self.log_file {
                write!(log_file, "{}", msg).unwrap_or_else(|_| {
                    eprintln!("{}: couldn't write into the log file", self.cmd_name);
                });
            }
        }
    }

    /// Log a message line, with a specified level.
    /// Logs also into the log file, if present.
    pub fn logln(&mut self, level: u32, msg: &str)
    {
        if self.verbosity >= level {
            eprintln!("{}", msg);

            if let Some(log_file) = &mut self.log_file {
                writeln!(log_file, "{}", msg).unwrap_or_else(|_| {
                    eprintln!("{}: couldn't write into the log file", self.cmd_name);
                });
            }
        }
    }

    /// Log a warning. Warnings are always shown.
    pub fn warn(&mut self, msg: &str)
    {
        self.logln(0, &format!("warning: {}", msg));
    }

    /// Report the progress of a scan phase, if enabled.
    /// Only roughly every tenth step is reported.
    pub fn status(&mut self, phase: &str, done: usize, total: usize)
    {
        if !self.status || total == 0 {
            return;
        }

        let step = usize::max(total / 10, 1);
        let done = done + 1;

        if done == 1 || done == total || done % step == 0 {
            self.logln(0, &format!("# {}: {}/{}", phase, done, total));
        }
    }
}
