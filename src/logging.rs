//! Logging setup
//!
//! Everything logs through `tracing`. The subscriber writes to standard
//! error, or to the local syslog daemon when `--syslog` is given.

use crate::error::{FanCopyError, Result};
use std::ffi::CString;
use std::io::{self, Write};
use std::os::raw::c_char;
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Identifier attached to every syslog record
static SYSLOG_IDENT: &[u8] = b"fancopy\0";

/// Filter directive used when `RUST_LOG` is not set
pub fn default_directive(verbose: bool, debug: bool) -> &'static str {
    if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    }
}

/// Install the global subscriber
pub fn init_logging(verbose: bool, debug: bool, syslog: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, debug)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if syslog {
        builder
            .with_ansi(false)
            .without_time()
            .with_level(false)
            .with_writer(SyslogMakeWriter::open())
            .try_init()
    } else {
        builder.with_writer(io::stderr).try_init()
    };

    installed.map_err(|e| FanCopyError::Logging(e.to_string()))
}

/// Syslog priority for a tracing level
pub fn syslog_priority(level: &Level) -> i32 {
    match *level {
        Level::ERROR => libc::LOG_ERR,
        Level::WARN => libc::LOG_WARNING,
        Level::INFO => libc::LOG_INFO,
        Level::DEBUG | Level::TRACE => libc::LOG_DEBUG,
    }
}

/// `MakeWriter` sending each formatted event to syslog
#[derive(Debug, Clone, Copy)]
pub struct SyslogMakeWriter {
    _opened: (),
}

impl SyslogMakeWriter {
    /// Open the process-wide syslog connection (`LOG_USER`)
    pub fn open() -> Self {
        // SAFETY: the ident is a static NUL-terminated string, as openlog keeps the pointer
        unsafe {
            libc::openlog(
                SYSLOG_IDENT.as_ptr() as *const c_char,
                libc::LOG_PID,
                libc::LOG_USER,
            );
        }
        Self { _opened: () }
    }
}

impl<'a> MakeWriter<'a> for SyslogMakeWriter {
    type Writer = SyslogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogWriter::new(libc::LOG_INFO)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        SyslogWriter::new(syslog_priority(meta.level()))
    }
}

/// Buffers one event and emits it line by line when dropped
#[derive(Debug)]
pub struct SyslogWriter {
    priority: i32,
    buffer: Vec<u8>,
}

impl SyslogWriter {
    fn new(priority: i32) -> Self {
        Self {
            priority,
            buffer: Vec::new(),
        }
    }

    /// Non-empty lines currently buffered, NUL bytes stripped
    fn lines(&self) -> Vec<CString> {
        self.buffer
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                let clean: Vec<u8> = line.iter().copied().filter(|b| *b != 0).collect();
                CString::new(clean).ok()
            })
            .collect()
    }
}

impl Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogWriter {
    fn drop(&mut self) {
        for line in self.lines() {
            // SAFETY: "%s" consumes exactly the one NUL-terminated argument passed
            unsafe {
                libc::syslog(self.priority, b"%s\0".as_ptr() as *const c_char, line.as_ptr());
            }
        }
    }
}
