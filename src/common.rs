// Licensed under the Apache-2.0 license

//! Logging shared by the bus drivers.
//!
//! Drivers carry a [`Logger`] as a generic parameter so that a build without a
//! console pays nothing for it ([`NoOpLogger`]), while a board with a spare UART
//! can route driver diagnostics through [`UartLogger`].

use core::fmt;

/// Sink for driver diagnostics.
pub trait Logger {
    fn debug(&mut self, args: fmt::Arguments<'_>);
    fn error(&mut self, args: fmt::Arguments<'_>);
}

/// Logger that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn debug(&mut self, _args: fmt::Arguments<'_>) {}
    fn error(&mut self, _args: fmt::Arguments<'_>) {}
}

/// Logger writing one `"[LEVEL] message"` line per record to an `embedded-io` writer.
///
/// Write errors are dropped: a failing console must never fail a bus transfer.
pub struct UartLogger<W: embedded_io::Write> {
    writer: W,
    debug_enabled: bool,
}

impl<W: embedded_io::Write> UartLogger<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            debug_enabled: true,
        }
    }

    /// Suppress `debug` records, keeping only errors.
    #[must_use]
    pub fn errors_only(mut self) -> Self {
        self.debug_enabled = false;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn record(&mut self, level: &str, args: fmt::Arguments<'_>) {
        let _ = write!(self.writer, "[{level}] {args}\r\n");
    }
}

impl<W: embedded_io::Write> Logger for UartLogger<W> {
    fn debug(&mut self, args: fmt::Arguments<'_>) {
        if self.debug_enabled {
            self.record("DEBUG", args);
        }
    }

    fn error(&mut self, args: fmt::Arguments<'_>) {
        self.record("ERROR", args);
    }
}

impl<L: Logger + ?Sized> Logger for &mut L {
    fn debug(&mut self, args: fmt::Arguments<'_>) {
        (**self).debug(args);
    }

    fn error(&mut self, args: fmt::Arguments<'_>) {
        (**self).error(args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    #[derive(Default)]
    struct Console {
        bytes: Vec<u8>,
    }

    impl embedded_io::ErrorType for Console {
        type Error = Infallible;
    }

    impl embedded_io::Write for Console {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[test]
    fn test_uart_logger_formats_levels() {
        let mut logger = UartLogger::new(Console::default());
        logger.debug(format_args!("baud {}", 12));
        logger.error(format_args!("nack at 0x{:02x}", 0x48));

        let text = String::from_utf8(logger.into_inner().bytes).unwrap();
        assert_eq!(text, "[DEBUG] baud 12\r\n[ERROR] nack at 0x48\r\n");
    }

    #[test]
    fn test_uart_logger_errors_only() {
        let mut logger = UartLogger::new(Console::default()).errors_only();
        logger.debug(format_args!("hidden"));
        logger.error(format_args!("shown"));

        let text = String::from_utf8(logger.into_inner().bytes).unwrap();
        assert_eq!(text, "[ERROR] shown\r\n");
    }

    #[test]
    fn test_logger_through_mutable_reference() {
        fn emit<L: Logger>(mut logger: L) {
            logger.error(format_args!("via ref"));
        }

        let mut logger = UartLogger::new(Console::default());
        emit(&mut logger);
        let text = String::from_utf8(logger.into_inner().bytes).unwrap();
        assert_eq!(text, "[ERROR] via ref\r\n");
    }
}
