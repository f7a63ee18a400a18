use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BytecodeError {
    #[error("unreadable byte source: {0}")]
    Unreadable(#[from] io::Error),
    #[error("magic number mismatch")]
    BadMagic,
}

/// Header layout expected by the active engine
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub magic: [u8; 4],
    /// Bytes after the magic that are skipped unvalidated (timestamp etc.)
    pub skip: usize,
}

impl Header {
    /// Check the magic, skip the rest of the header and return the payload
    pub fn read_payload(&self, mut source: impl Read) -> Result<Vec<u8>, BytecodeError> {
        let mut found = [0u8; 4];
        match source.read_exact(&mut found) {
            Ok(()) if found == self.magic => {}
            Ok(()) => return Err(BytecodeError::BadMagic),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(BytecodeError::BadMagic);
            }
            Err(e) => return Err(e.into()),
        }

        io::copy(&mut source.by_ref().take(self.skip as u64), &mut io::sink())?;

        let mut payload = Vec::new();
        source.read_to_end(&mut payload)?;
        Ok(payload)
    }

    /// Read a compiled-unit file; the handle is released before returning
    pub fn load_file(&self, path: &Path) -> Result<Vec<u8>, BytecodeError> {
        let file = File::open(path)?;
        self.read_payload(file)
    }
}
