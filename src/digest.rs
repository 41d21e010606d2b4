//! The string digest: an append-only interning arena addressed by 16-bit
//! offsets. STRING-tagged values carry the offset, so string equality is
//! payload equality.

use std::collections::HashMap;

use crate::vm_ensure;

/// Each entry is a little-endian `u16` length followed by the UTF-8 bytes.
pub struct Digest {
    bytes: Vec<u8>,
    interned: HashMap<String, u16>,
}

impl Digest {
    pub fn new() -> Self {
        Digest {
            bytes: Vec::new(),
            interned: HashMap::new(),
        }
    }

    /// Intern a string, returning the existing offset if already present.
    pub fn add(&mut self, s: &str) -> anyhow::Result<u16> {
        if let Some(&addr) = self.interned.get(s) {
            return Ok(addr);
        }
        vm_ensure!(
            s.len() <= u16::MAX as usize,
            Encoding,
            "string of {} bytes does not fit the digest",
            s.len()
        );
        let addr = self.bytes.len();
        vm_ensure!(
            addr + 2 + s.len() <= u16::MAX as usize,
            Encoding,
            "string digest full"
        );
        self.bytes.extend_from_slice(&(s.len() as u16).to_le_bytes());
        self.bytes.extend_from_slice(s.as_bytes());
        let addr = addr as u16;
        self.interned.insert(s.to_owned(), addr);
        Ok(addr)
    }

    /// The offset of an already-interned string, if any.
    pub fn find(&self, s: &str) -> Option<u16> {
        self.interned.get(s).copied()
    }

    pub fn length(&self, addr: u16) -> anyhow::Result<u16> {
        let at = addr as usize;
        vm_ensure!(at + 2 <= self.bytes.len(), MemoryFault, "digest address {addr} out of range");
        Ok(u16::from_le_bytes([self.bytes[at], self.bytes[at + 1]]))
    }

    pub fn get(&self, addr: u16) -> anyhow::Result<&str> {
        let len = self.length(addr)? as usize;
        let start = addr as usize + 2;
        vm_ensure!(
            start + len <= self.bytes.len(),
            MemoryFault,
            "digest address {addr} out of range"
        );
        std::str::from_utf8(&self.bytes[start..start + len])
            .map_err(|_| crate::error::vm_err(crate::error::ErrorKind::Encoding, "digest holds invalid UTF-8"))
    }
}

impl Default for Digest {
    fn default() -> Self {
        Digest::new()
    }
}
