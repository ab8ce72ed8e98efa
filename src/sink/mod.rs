//! Log output module.
//!
//! This module defines the `LogTarget` trait for anything summary lines can
//! be appended to, and the buffering `LogSink` that writes to it.

mod log_sink;

pub use log_sink::{LogSink, DEFAULT_BUFFER_CAPACITY};

use std::fs::File;
use std::io::{self, Write};

/// Destination for formatted log lines.
///
/// `sync` is called after every flush. Implementations backed by durable
/// storage should push written data to disk there.
pub trait LogTarget: Write + Send {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogTarget for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

impl LogTarget for Vec<u8> {}

impl LogTarget for io::Stdout {}

impl<T: LogTarget + ?Sized> LogTarget for Box<T> {
    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }
}
