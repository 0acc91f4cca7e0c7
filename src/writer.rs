//! Framed transaction files.
//!
//! Each record is a 4-byte big-endian length followed by one serialized
//! transaction. Records are appended in generation order, so replaying the
//! file reproduces the stream.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use quota_scheduler::TransactionSink;

/// Buffered writer producing a framed traffic file.
#[derive(Debug)]
pub struct TrafficWriter {
    inner: BufWriter<File>,
    records: u64,
    closed: bool,
}

impl TrafficWriter {
    /// Creates (or truncates) the output file.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: BufWriter::new(file),
            records: 0,
            closed: false,
        })
    }

    /// Records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }
}

impl TransactionSink for TrafficWriter {
    type Error = io::Error;

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "traffic writer is closed"));
        }
        let len = u32::try_from(bytes.len())
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "record exceeds 4 GiB"))?;
        self.inner.write_all(&len.to_be_bytes())?;
        self.inner.write_all(bytes)?;
        self.records += 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.flush()?;
        self.inner.get_ref().sync_all()?;
        tracing::debug!(records = self.records, "traffic file closed");
        Ok(())
    }
}

/// Iterates the records of a framed traffic file.
#[derive(Debug)]
pub struct TrafficReader<R> {
    inner: R,
}

impl TrafficReader<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> TrafficReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    fn read_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut len = [0u8; 4];
        let mut filled = 0;
        while filled < len.len() {
            match self.inner.read(&mut len[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        // The length prefix is untrusted: grow the buffer only as bytes arrive.
        let len = u64::from(u32::from_be_bytes(len));
        let mut record = Vec::new();
        (&mut self.inner).take(len).read_to_end(&mut record)?;
        if record.len() as u64 != len {
            return Err(ErrorKind::UnexpectedEof.into());
        }
        Ok(Some(record))
    }
}

impl<R: Read> Iterator for TrafficReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// In-memory sink, for tests and benchmarks.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Vec<Vec<u8>>,
    closes: usize,
}

impl MemorySink {
    pub fn records(&self) -> &[Vec<u8>] {
        &self.records
    }

    /// Number of times `close` was called.
    pub fn close_count(&self) -> usize {
        self.closes
    }

    pub fn is_closed(&self) -> bool {
        self.closes > 0
    }
}

impl TransactionSink for MemorySink {
    type Error = io::Error;

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "sink is closed"));
        }
        self.records.push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closes += 1;
        Ok(())
    }
}
