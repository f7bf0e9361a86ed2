use std::io::{self, Write};

use crate::domain::Balance;

/// Writes the final balance report as `user,balance` CSV.
pub struct CsvOutput<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvOutput<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(inner),
        }
    }

    /// Rows are written in the order given; callers pass them sorted by user.
    pub fn write_balances(&mut self, balances: &[Balance]) -> io::Result<()> {
        self.writer.write_record(["user", "balance"]).map_err(to_io)?;
        for balance in balances {
            self.writer
                .write_record([balance.user_id.to_string(), balance.amount.to_string()])
                .map_err(to_io)?;
        }
        self.writer.flush()
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}

fn to_io(e: csv::Error) -> io::Error {
    io::Error::other(e)
}
