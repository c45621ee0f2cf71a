//! Record sources and sinks.
//!
//! A sender pulls records from a [`RecordSource`]; a receiver hands every
//! delivered record, in order and exactly once, to a [`RecordSink`].

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use crate::message::SeqNum;

/// Ordered stream of records to transmit.
pub trait RecordSource {
    /// The next record, or `None` at end of input.
    fn next_record(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Restart from the first record.
    fn rewind(&mut self) -> io::Result<()>;
}

/// Destination for delivered records.
pub trait RecordSink {
    fn deliver(&mut self, seq: SeqNum, record: &[u8]) -> io::Result<()>;
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// One record per line of a text file, without the line terminator.
#[derive(Debug)]
pub struct LineSource {
    reader: BufReader<File>,
}

impl LineSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
        })
    }
}

impl RecordSource for LineSource {
    fn next_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        if self.reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

/// Records held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Vec<Vec<u8>>,
    next: usize,
}

impl MemorySource {
    pub fn new<I, R>(records: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Vec<u8>>,
    {
        Self {
            records: records.into_iter().map(Into::into).collect(),
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordSource for MemorySource {
    fn next_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        let record = self.records.get(self.next).cloned();
        if record.is_some() {
            self.next += 1;
        }
        Ok(record)
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.next = 0;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Appends `"<YYYY-MM-DD HH:MM:SS> - Seq <n>: <payload>"` lines to a file.
#[derive(Debug)]
pub struct LogFileSink {
    writer: BufWriter<File>,
}

impl LogFileSink {
    /// Open `path` for appending, creating it if needed.
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl RecordSink for LogFileSink {
    fn deliver(&mut self, seq: SeqNum, record: &[u8]) -> io::Result<()> {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(
            self.writer,
            "{stamp} - Seq {seq}: {}",
            String::from_utf8_lossy(record)
        )?;
        self.writer.flush()
    }
}

impl RecordSink for Vec<(SeqNum, Vec<u8>)> {
    fn deliver(&mut self, seq: SeqNum, record: &[u8]) -> io::Result<()> {
        self.push((seq, record.to_vec()));
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn deliver(&mut self, seq: SeqNum, record: &[u8]) -> io::Result<()> {
        (**self).deliver(seq, record)
    }
}
