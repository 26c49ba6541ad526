//! `print!`/`println!` and a `log::Log` backend over a single global
//! [`Console`] sink.
//!
//! This is the same sink the monitor's WRITE call writes guest bytes to
//! (spec §4.5, call 1) and that the monitor's own diagnostics — unhandled
//! exception dumps, lockstep failures, isolation setup errors — go through
//! at `debug`/`warn`/`error` level. Guest output and monitor logging share
//! one path so nothing needs a second, parallel plumbing story for `no_std`.

#![no_std]

pub extern crate log;

use core::fmt;
use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Once;

/// A byte-oriented output sink. Implementors need only provide `put_char`;
/// `put_str` has a default that calls it once per byte, but a sink backed by
/// a buffered UART or an in-memory `Vec` should override it.
pub trait Console: Sync {
    fn put_char(&self, c: u8);

    fn put_str(&self, s: &str) {
        for byte in s.bytes() {
            self.put_char(byte);
        }
    }
}

static CONSOLE: Once<&'static dyn Console> = Once::new();

/// Installs the global console and registers it as the `log` backend.
///
/// Idempotent: a second call is ignored rather than panicking, since an
/// embedder composing several crates that each try to set up logging should
/// not have to coordinate who calls this first.
pub fn init_console(console: &'static dyn Console) {
    CONSOLE.call_once(|| console);
    let _ = log::set_logger(&Logger);
}

/// Sets the global maximum log level from a name (`"trace"` .. `"error"`,
/// case-insensitive). Anything else, including `None`, selects `Trace`.
pub fn set_log_level(env: Option<&str>) {
    let level = match env.map(str_to_lower_ascii) {
        Some(ref s) if s.as_str() == "error" => LevelFilter::Error,
        Some(ref s) if s.as_str() == "warn" => LevelFilter::Warn,
        Some(ref s) if s.as_str() == "info" => LevelFilter::Info,
        Some(ref s) if s.as_str() == "debug" => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    log::set_max_level(level);
}

/// Lowercases up to 15 ASCII bytes without an allocator.
fn str_to_lower_ascii(s: &str) -> Ascii15 {
    let mut buf = [0u8; 15];
    let mut len = 0;
    for byte in s.bytes().take(15) {
        buf[len] = byte.to_ascii_lowercase();
        len += 1;
    }
    Ascii15 { buf, len }
}

struct Ascii15 {
    buf: [u8; 15],
    len: usize,
}

impl Ascii15 {
    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

/// Writes one raw byte to the console, bypassing formatting entirely. This
/// is what the WRITE monitor call drives directly (spec §4.5, call 1): the
/// guest hands over one byte at a time, with no framing of its own.
pub fn put_byte(byte: u8) {
    let console = CONSOLE.get().expect("console not initialized");
    console.put_char(byte);
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    let console = CONSOLE.get().expect("console not initialized");
    let mut writer = ConsoleWriter { console: *console };
    fmt::write(&mut writer, args).unwrap();
}

struct ConsoleWriter {
    console: &'static dyn Console,
}

impl fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.console.put_str(s);
        Ok(())
    }
}

struct Logger;

impl Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let (color, label) = match record.level() {
            Level::Error => ("31", "ERROR"),
            Level::Warn => ("93", " WARN"),
            Level::Info => ("34", " INFO"),
            Level::Debug => ("32", "DEBUG"),
            Level::Trace => ("90", "TRACE"),
        };

        let console = *CONSOLE.get().unwrap();
        console.put_str("\x1b[");
        console.put_str(color);
        console.put_str("m[");
        console.put_str(label);
        console.put_str("] ");

        let mut writer = ConsoleWriter { console };
        fmt::write(&mut writer, *record.args()).unwrap();

        console.put_str("\x1b[0m\n");
    }

    fn flush(&self) {}
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::_print(format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::_print(format_args!("\n"));
    };
    ($($arg:tt)*) => {
        {
            $crate::_print(format_args!($($arg)*));
            $crate::_print(format_args!("\n"));
        }
    };
}
