// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::fmt;

#[derive(Debug)]
pub enum GdbError {
    BadPacketChecksum,
    BreakRequested,
    ReadError(String),
    WriteError(String),
}

impl fmt::Display for GdbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GdbError::BadPacketChecksum => write!(f, "bad packet checksum"),
            GdbError::BreakRequested => write!(f, "break requested"),
            GdbError::ReadError(msg) => write!(f, "read error: {}", msg),
            GdbError::WriteError(msg) => write!(f, "write error: {}", msg),
        }
    }
}

impl std::error::Error for GdbError {}

impl From<std::io::Error> for GdbError {
    fn from(err: std::io::Error) -> Self {
        GdbError::ReadError(err.to_string())
    }
}
