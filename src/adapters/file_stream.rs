//! Filesystem artifact source.
//!
//! Artifacts live as flat files in one directory (SPIFFS / FAT mount on
//! the device, any directory on the host).  Opening a file reads it once
//! to compute the checksum announced in the start frame, then rewinds.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::PathBuf;

use log::warn;

use crate::app::ports::{SourceStream, StreamSource};
use crate::error::StreamError;

const CHECKSUM_BUF: usize = 512;

#[derive(Debug, Clone)]
pub struct FileStreamSource {
    root: PathBuf,
}

impl FileStreamSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

pub struct FileStream {
    file: File,
    len: u32,
    checksum: u32,
}

impl SourceStream for FileStream {
    fn len(&self) -> u32 {
        self.len
    }

    fn checksum(&self) -> u32 {
        self.checksum
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("file stream: read failed: {}", e);
                    return Err(StreamError::ReadFailed);
                }
            }
        }
        Ok(filled)
    }

    fn seek(&mut self, offset: u32) -> Result<(), StreamError> {
        if offset > self.len {
            return Err(StreamError::SeekFailed);
        }
        self.file
            .seek(SeekFrom::Start(u64::from(offset)))
            .map_err(|_| StreamError::SeekFailed)?;
        Ok(())
    }
}

impl StreamSource for FileStreamSource {
    type Stream = FileStream;

    fn open(&mut self, name: &str) -> Result<FileStream, StreamError> {
        if name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(StreamError::NotFound);
        }
        let path = self.root.join(name);
        let mut file = File::open(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StreamError::NotFound,
            _ => StreamError::OpenFailed,
        })?;
        let len = file
            .metadata()
            .map_err(|_| StreamError::OpenFailed)?
            .len();
        let len = u32::try_from(len).map_err(|_| StreamError::InvalidLength)?;

        let mut checksum = 0u32;
        let mut buf = [0u8; CHECKSUM_BUF];
        loop {
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    checksum = buf[..n]
                        .iter()
                        .fold(checksum, |acc, &b| acc.wrapping_add(u32::from(b)));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => return Err(StreamError::ReadFailed),
            }
        }
        file.seek(SeekFrom::Start(0))
            .map_err(|_| StreamError::SeekFailed)?;

        Ok(FileStream {
            file,
            len,
            checksum,
        })
    }
}
