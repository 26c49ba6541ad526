//! Integration tests for the console/logging sink.
//!
//! `CONSOLE` is a process-global `Once`, so every test shares one console
//! instance; tests clear the shared buffer instead of re-initializing.

use std::sync::{Arc, Mutex, Once};
use tee_console::{init_console, set_log_level, Console};

struct TestConsole {
    output: Arc<Mutex<Vec<u8>>>,
}

impl Console for TestConsole {
    fn put_char(&self, c: u8) {
        self.output.lock().unwrap().push(c);
    }

    fn put_str(&self, s: &str) {
        self.output.lock().unwrap().extend_from_slice(s.as_bytes());
    }
}

static SHARED_OUTPUT: Mutex<Option<Arc<Mutex<Vec<u8>>>>> = Mutex::new(None);
static SHARED_CONSOLE_INIT: Once = Once::new();

fn get_shared_output() -> Arc<Mutex<Vec<u8>>> {
    {
        let guard = SHARED_OUTPUT.lock().unwrap();
        if let Some(ref output) = *guard {
            return output.clone();
        }
    }

    SHARED_CONSOLE_INIT.call_once(|| {
        let output = Arc::new(Mutex::new(Vec::new()));
        let console = Box::leak(Box::new(TestConsole {
            output: output.clone(),
        }));
        init_console(console);
        *SHARED_OUTPUT.lock().unwrap() = Some(output);
    });

    let guard = SHARED_OUTPUT.lock().unwrap();
    guard.as_ref().unwrap().clone()
}

fn clear_output() {
    get_shared_output().lock().unwrap().clear();
}

fn get_output() -> Vec<u8> {
    get_shared_output().lock().unwrap().clone()
}

#[test]
fn console_trait_put_char_appends_bytes() {
    let output = Arc::new(Mutex::new(Vec::new()));
    let console = TestConsole {
        output: output.clone(),
    };

    console.put_char(b'A');
    console.put_char(b'B');
    assert_eq!(output.lock().unwrap().as_slice(), b"AB");
}

#[test]
fn console_trait_default_put_str_calls_put_char_per_byte() {
    struct PerByteOnly {
        output: Mutex<Vec<u8>>,
    }
    impl Console for PerByteOnly {
        fn put_char(&self, c: u8) {
            self.output.lock().unwrap().push(c);
        }
    }

    let console = PerByteOnly {
        output: Mutex::new(Vec::new()),
    };
    console.put_str("hi");
    assert_eq!(console.output.lock().unwrap().as_slice(), b"hi");
}

#[test]
fn init_console_is_idempotent() {
    clear_output();
    get_shared_output();

    tee_console::print!("init test");
    let bytes = get_output();
    assert!(!bytes.is_empty());
}

#[test]
fn set_log_level_accepts_every_name_and_falls_back_on_garbage() {
    set_log_level(None);
    set_log_level(Some("info"));
    set_log_level(Some("debug"));
    set_log_level(Some("trace"));
    set_log_level(Some("warn"));
    set_log_level(Some("error"));
    set_log_level(Some("WARN"));
    set_log_level(Some("not-a-level"));
}

#[test]
fn print_macro_writes_raw_bytes() {
    clear_output();
    tee_console::print!("test");
    assert_eq!(get_output(), b"test");
}

#[test]
fn println_macro_empty_emits_newline_only() {
    clear_output();
    tee_console::println!();
    assert_eq!(get_output(), b"\n");
}

#[test]
fn println_macro_formats_and_appends_newline() {
    clear_output();
    tee_console::println!("hello {}", "world");
    let output_str = String::from_utf8(get_output()).unwrap();
    assert!(output_str.contains("hello"));
    assert!(output_str.contains("world"));
    assert!(output_str.ends_with('\n'));
}

#[test]
fn println_formatting_specifiers_work() {
    clear_output();
    tee_console::println!("Number: {}", 42);
    tee_console::println!("Hex: {:#x}", 255);

    let output_str = String::from_utf8(get_output()).unwrap();
    assert!(output_str.contains("42"));
    assert!(output_str.contains("0xff"));
}

#[test]
fn log_macros_reach_the_console() {
    clear_output();
    set_log_level(Some("trace"));

    log::trace!("trace message");
    log::debug!("debug message");
    log::info!("info message");
    log::warn!("warn message");
    log::error!("error message");

    let output_str = String::from_utf8(get_output()).unwrap();
    for needle in ["trace message", "debug message", "info message", "warn message", "error message"] {
        assert!(output_str.contains(needle), "missing {needle:?} in {output_str:?}");
    }
    for level in ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"] {
        assert!(output_str.contains(level), "missing {level} label in {output_str:?}");
    }
}

#[test]
fn console_is_sync_and_usable_across_threads() {
    let output = Arc::new(Mutex::new(Vec::new()));
    let console = Arc::new(TestConsole {
        output: output.clone(),
    });

    let console_clone = console.clone();
    std::thread::spawn(move || {
        console_clone.put_char(b'X');
    })
    .join()
    .unwrap();

    assert_eq!(output.lock().unwrap().as_slice(), b"X");
}
