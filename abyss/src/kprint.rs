//! Kernel print utilities.

use core::fmt::Write;
use spin_lock::SpinLock;

/// A character sink the kernel prints to.
///
/// The console driver (glyph blitting, cursor handling) lives outside this
/// crate; the kernel only needs to hand it one character at a time.
pub trait Console: Sync {
    /// Emit a single character.
    fn emit_char(&self, ch: u8);
}

static CONSOLE: SpinLock<Option<&'static dyn Console>> = SpinLock::new(None);

/// Register the console that the print macros write to.
///
/// Until a console is registered, printed messages are discarded.
pub fn set_console(console: &'static dyn Console) {
    *CONSOLE.lock() = Some(console);
}

/// Adapts a [`Console`] to [`core::fmt::Write`].
///
/// A bare `\n` is emitted as `\r\n` since the console treats them as
/// separate cursor movements.
pub struct ConsoleWriter<'a>(pub &'a dyn Console);

impl Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for b in s.bytes() {
            if b == b'\n' {
                self.0.emit_char(b'\r');
            }
            self.0.emit_char(b);
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    let console = *CONSOLE.lock();
    if let Some(console) = console {
        let _ = write!(ConsoleWriter(console), "{}", fmt);
    }
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => ($crate::kprint::_print(
            format_args!(
                "[INFO] {}\n",
                format_args!($($arg)*)
            )
        )
    );
}

/// Display a warning message.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => ($crate::kprint::_print(
            format_args!(
                "[WARNING] {}\n",
                format_args!($($arg)*)
            )
        )
    );
}

/// Print msg if debug build
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            $crate::kprint::_print(
                format_args!(
                    "[DEBUG] {}\n",
                    format_args!($($arg)*)
                )
            )
        }
    }
}
