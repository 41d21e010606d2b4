//! Unified memory: one flat byte buffer holding the code segment, both
//! stacks and the heap. Stack registers and references address it by
//! absolute cell index; the code segment is byte-addressed from zero.

use serde::Serialize;

use crate::tagged::Value;
use crate::vm_ensure;

pub const CELL_BYTES: usize = 4;

pub const CODE_BYTES: usize = 0x2000;
pub const CODE_CELLS: usize = CODE_BYTES / CELL_BYTES;

pub const STACK_BASE: usize = CODE_CELLS;
pub const STACK_CELLS: usize = 1024;

pub const RSTACK_BASE: usize = STACK_BASE + STACK_CELLS;
pub const RSTACK_CELLS: usize = 1024;

pub const DATA_BASE: usize = RSTACK_BASE + RSTACK_CELLS;
pub const DATA_CELLS: usize = 8192;

pub const MEMORY_CELLS: usize = DATA_BASE + DATA_CELLS;
pub const MEMORY_BYTES: usize = MEMORY_CELLS * CELL_BYTES;

/// First opcode byte that denotes a user-word call; also the first
/// emittable code address, so the two spaces never collide.
pub const MIN_USER_OPCODE: usize = 128;

/// User-word call addresses are 15-bit.
pub const MAX_USER_ADDR: usize = 0x7FFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Segment {
    Code,
    Stack,
    Rstack,
    Data,
}

pub fn segment_of(cell: usize) -> Segment {
    if cell < STACK_BASE {
        Segment::Code
    } else if cell < RSTACK_BASE {
        Segment::Stack
    } else if cell < DATA_BASE {
        Segment::Rstack
    } else {
        Segment::Data
    }
}

pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            bytes: vec![0; MEMORY_BYTES],
        }
    }

    fn check(&self, addr: usize, len: usize) -> anyhow::Result<()> {
        // addr + len cannot overflow: both are bounded by MEMORY_BYTES checks
        vm_ensure!(
            addr.checked_add(len).is_some_and(|end| end <= MEMORY_BYTES),
            MemoryFault,
            "access of {len} bytes at {addr} outside memory"
        );
        Ok(())
    }

    pub fn read8(&self, addr: usize) -> anyhow::Result<u8> {
        self.check(addr, 1)?;
        Ok(self.bytes[addr])
    }

    pub fn write8(&mut self, addr: usize, v: u8) -> anyhow::Result<()> {
        self.check(addr, 1)?;
        self.bytes[addr] = v;
        Ok(())
    }

    pub fn read16(&self, addr: usize) -> anyhow::Result<u16> {
        self.check(addr, 2)?;
        Ok(u16::from_le_bytes([self.bytes[addr], self.bytes[addr + 1]]))
    }

    pub fn write16(&mut self, addr: usize, v: u16) -> anyhow::Result<()> {
        self.check(addr, 2)?;
        self.bytes[addr..addr + 2].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub fn read_i16(&self, addr: usize) -> anyhow::Result<i16> {
        Ok(self.read16(addr)? as i16)
    }

    pub fn write_i16(&mut self, addr: usize, v: i16) -> anyhow::Result<()> {
        self.write16(addr, v as u16)
    }

    pub fn read_f32(&self, addr: usize) -> anyhow::Result<f32> {
        self.check(addr, 4)?;
        let raw: [u8; 4] = self.bytes[addr..addr + 4].try_into().expect("len checked");
        Ok(f32::from_bits(u32::from_le_bytes(raw)))
    }

    pub fn write_f32(&mut self, addr: usize, v: f32) -> anyhow::Result<()> {
        self.check(addr, 4)?;
        self.bytes[addr..addr + 4].copy_from_slice(&v.to_bits().to_le_bytes());
        Ok(())
    }

    pub fn read_cell(&self, cell: usize) -> anyhow::Result<Value> {
        vm_ensure!(cell < MEMORY_CELLS, MemoryFault, "cell {cell} outside memory");
        Ok(Value::number(
            self.read_f32(cell * CELL_BYTES).expect("cell range checked"),
        ))
    }

    pub fn write_cell(&mut self, cell: usize, v: Value) -> anyhow::Result<()> {
        vm_ensure!(cell < MEMORY_CELLS, MemoryFault, "cell {cell} outside memory");
        self.write_f32(cell * CELL_BYTES, v.as_f32())
            .expect("cell range checked");
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Memory::new()
    }
}

// every cell index must fit a 16-bit reference payload
const _: () = assert!(MEMORY_CELLS <= u16::MAX as usize + 1);
const _: () = assert!(CODE_BYTES <= MAX_USER_ADDR + 1);
