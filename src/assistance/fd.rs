use flate2::{Compression, read::GzDecoder, write::GzEncoder};

use std::{
    fs::File,
    io::{BufReader, Read, Result, Write},
    path::Path,
};

/// Output handle, plain or gzip compressed
pub enum FileDescriptor {
    Plain(File),
    Gzip(GzEncoder<File>),
}

impl Write for FileDescriptor {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        match self {
            Self::Plain(w) => w.write(data),
            Self::Gzip(w) => w.write(data),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}

impl FileDescriptor {
    pub fn create(gzip: bool, path: &Path) -> Result<Self> {
        let fd = File::create(path)?;

        if gzip {
            let compression = Compression::new(5);
            Ok(Self::Gzip(GzEncoder::new(fd, compression)))
        } else {
            Ok(Self::Plain(fd))
        }
    }

    /// Terminates the stream (gzip trailer) and syncs content to disk
    pub fn finish(self) -> Result<()> {
        let mut fd = match self {
            Self::Plain(fd) => fd,
            Self::Gzip(encoder) => encoder.finish()?,
        };
        fd.flush()?;
        fd.sync_all()
    }
}

/// Input handle, plain or gzip compressed
pub enum ReadDescriptor {
    Plain(BufReader<File>),
    Gzip(GzDecoder<BufReader<File>>),
}

impl Read for ReadDescriptor {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Plain(r) => r.read(buf),
            Self::Gzip(r) => r.read(buf),
        }
    }
}

impl ReadDescriptor {
    pub fn open(gzip: bool, path: &Path) -> Result<Self> {
        let fd = BufReader::new(File::open(path)?);
        if gzip {
            Ok(Self::Gzip(GzDecoder::new(fd)))
        } else {
            Ok(Self::Plain(fd))
        }
    }
}
