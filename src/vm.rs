//! VM state and the stack primitives everything else is built from.
//!
//! Stack discipline:
//!
//! ```text
//! |  ...    |
//! |  cell   | <-- sp (next free data cell)
//! |  cell   |
//! |---------| <-- STACK_BASE
//! ```
//!
//! The return stack additionally holds call frames: on entry the caller's
//! `bp` and the return address are pushed and `bp` is set to `rsp`, so the
//! two saved words sit at `bp - 2` and `bp - 1` and local slot `k` lives
//! at cell `bp + k + 2`. `Exit` rewinds `rsp` to `bp` and pops both.

use std::collections::HashSet;

use crate::compiler::Compiler;
use crate::digest::Digest;
use crate::error::{vm_err, ErrorKind};
use crate::mem::{
    Memory, DATA_BASE, DATA_CELLS, RSTACK_BASE, RSTACK_CELLS, STACK_BASE, STACK_CELLS,
};
use crate::repl::IncludeHost;
use crate::tagged::Value;
use crate::{dict, vm_ensure};

pub struct Vm {
    pub mem: Memory,
    pub digest: Digest,
    pub compiler: Compiler,

    /// Instruction pointer: byte offset into the code segment.
    pub ip: usize,
    /// Next free data-stack cell (absolute cell index).
    pub sp: usize,
    /// Next free return-stack cell.
    pub rsp: usize,
    /// Base pointer of the current frame.
    pub bp: usize,
    /// Open-list nesting depth during list construction.
    pub list_depth: u32,
    pub running: bool,
    /// Receiver of the currently executing capsule method, NIL outside
    /// dispatch.
    pub receiver: Value,

    /// Next free heap cell.
    pub heap_top: usize,
    /// DATA_REF to the newest dictionary entry, NIL when empty.
    pub dict_head: Value,
    /// Checkpoints saved by `mark`: (dict head, heap top).
    pub marks: Vec<(Value, usize)>,

    /// Text produced by `.` and `raw`; drained by the host.
    pub output: String,

    pub include_host: Option<Box<dyn IncludeHost>>,
    pub included: HashSet<String>,
    pub current_source: Option<String>,
}

impl Vm {
    pub fn new() -> anyhow::Result<Vm> {
        let mut vm = Vm {
            mem: Memory::new(),
            digest: Digest::new(),
            compiler: Compiler::new(),
            ip: 0,
            sp: STACK_BASE,
            rsp: RSTACK_BASE,
            bp: RSTACK_BASE,
            list_depth: 0,
            running: false,
            receiver: Value::NIL,
            heap_top: DATA_BASE,
            dict_head: Value::NIL,
            marks: Vec::new(),
            output: String::new(),
            include_host: None,
            included: HashSet::new(),
            current_source: None,
        };
        dict::register_builtins(&mut vm)?;
        Ok(vm)
    }

    /// Reset to a known good state after an error, preserving the heap,
    /// digest and dictionary.
    pub fn reset(&mut self) {
        self.sp = STACK_BASE;
        self.rsp = RSTACK_BASE;
        self.bp = RSTACK_BASE;
        self.list_depth = 0;
        self.running = false;
        self.receiver = Value::NIL;
        self.compiler.reset();
    }

    // --- data stack ---

    pub fn push(&mut self, v: Value) -> anyhow::Result<()> {
        vm_ensure!(
            self.sp < STACK_BASE + STACK_CELLS,
            StackOverflow,
            "data stack full at {} cells",
            STACK_CELLS
        );
        self.mem.write_cell(self.sp, v)?;
        self.sp += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> anyhow::Result<Value> {
        vm_ensure!(self.sp > STACK_BASE, StackUnderflow, "data stack empty");
        self.sp -= 1;
        self.mem.read_cell(self.sp)
    }

    pub fn peek(&self) -> anyhow::Result<Value> {
        vm_ensure!(self.sp > STACK_BASE, StackUnderflow, "data stack empty");
        self.mem.read_cell(self.sp - 1)
    }

    pub fn peek_at(&self, k: usize) -> anyhow::Result<Value> {
        vm_ensure!(
            self.sp > STACK_BASE + k,
            StackUnderflow,
            "data stack holds fewer than {} cells",
            k + 1
        );
        self.mem.read_cell(self.sp - 1 - k)
    }

    pub fn depth(&self) -> usize {
        self.sp - STACK_BASE
    }

    /// Snapshot of all live data cells, bottom to top.
    pub fn stack_data(&self) -> Vec<Value> {
        (STACK_BASE..self.sp)
            .map(|c| self.mem.read_cell(c).expect("live cell"))
            .collect()
    }

    // --- return stack ---

    pub fn rpush(&mut self, v: Value) -> anyhow::Result<()> {
        vm_ensure!(
            self.rsp < RSTACK_BASE + RSTACK_CELLS,
            StackOverflow,
            "return stack full at {} cells",
            RSTACK_CELLS
        );
        self.mem.write_cell(self.rsp, v)?;
        self.rsp += 1;
        Ok(())
    }

    pub fn rpop(&mut self) -> anyhow::Result<Value> {
        vm_ensure!(self.rsp > RSTACK_BASE, StackUnderflow, "return stack empty");
        self.rsp -= 1;
        self.mem.read_cell(self.rsp)
    }

    // --- element geometry ---

    /// Cells occupied by the element whose top cell is `top`: a LIST
    /// header spans its payload too.
    pub fn span_at(&self, top: usize) -> anyhow::Result<usize> {
        let v = self.mem.read_cell(top)?;
        if v.is_list() {
            Ok(v.payload() as usize + 1)
        } else {
            Ok(1)
        }
    }

    /// Start cell and span of the topmost element.
    pub fn top_element(&self) -> anyhow::Result<(usize, usize)> {
        self.element_ending_at(self.sp)
    }

    /// Start cell and span of the element whose highest cell is `end - 1`.
    pub fn element_ending_at(&self, end: usize) -> anyhow::Result<(usize, usize)> {
        vm_ensure!(end > STACK_BASE, StackUnderflow, "data stack empty");
        let span = self.span_at(end - 1)?;
        vm_ensure!(
            end - STACK_BASE >= span,
            StackUnderflow,
            "list payload truncated by stack base"
        );
        Ok((end - span, span))
    }

    /// Walk one element down from slot offset `start_slot` (cells below
    /// the top of stack). Returns `(next_slot, size)` where `size` counts
    /// the payload of a LIST header.
    pub fn find_element(&self, start_slot: usize) -> anyhow::Result<(usize, usize)> {
        let cell = self
            .sp
            .checked_sub(1 + start_slot)
            .ok_or_else(|| vm_err(ErrorKind::StackUnderflow, "slot offset out of range"))?;
        vm_ensure!(cell >= STACK_BASE, StackUnderflow, "slot offset out of range");
        let size = self.span_at(cell)?;
        Ok((start_slot + size, size))
    }

    /// Top cell of logical element `index` of the list at `header` (the
    /// nested header cell for a compound element), or None past the end.
    /// Elements are walked downward from just below the header.
    pub fn elem_top_cell(&self, header: usize, index: usize) -> anyhow::Result<Option<usize>> {
        let hdr = self.mem.read_cell(header)?;
        vm_ensure!(hdr.is_list(), Type, "elem target is not a list");
        let payload = hdr.payload() as usize;
        let mut cursor = header;
        let mut used = 0usize;
        for i in 0..=index {
            if used >= payload {
                return Ok(None);
            }
            let top = cursor - 1;
            let span = self.span_at(top)?;
            used += span;
            vm_ensure!(used <= payload, Type, "malformed list payload");
            if i == index {
                return Ok(Some(top));
            }
            cursor -= span;
        }
        Ok(None)
    }

    /// Number of logical elements of the list at `header`.
    pub fn logical_size(&self, header: usize) -> anyhow::Result<usize> {
        let hdr = self.mem.read_cell(header)?;
        vm_ensure!(hdr.is_list(), Type, "size target is not a list");
        let payload = hdr.payload() as usize;
        let mut used = 0usize;
        let mut count = 0usize;
        let mut cell = header;
        while used < payload {
            let span = self.span_at(cell - 1)?;
            cell -= span;
            used += span;
            count += 1;
        }
        vm_ensure!(used == payload, Type, "malformed list payload");
        Ok(count)
    }

    // --- data-stack span plumbing ---

    /// Push copies of `len` cells starting at `src`, preserving order.
    pub fn copy_span_to_top(&mut self, src: usize, len: usize) -> anyhow::Result<()> {
        for i in 0..len {
            let v = self.mem.read_cell(src + i)?;
            self.push(v)?;
        }
        Ok(())
    }

    /// Remove `len` cells starting at `start`, sliding anything above
    /// them down.
    pub fn remove_span(&mut self, start: usize, len: usize) -> anyhow::Result<()> {
        vm_ensure!(
            start >= STACK_BASE && start + len <= self.sp,
            StackUnderflow,
            "span removal outside live stack"
        );
        for i in start..self.sp - len {
            let v = self.mem.read_cell(i + len)?;
            self.mem.write_cell(i, v)?;
        }
        self.sp -= len;
        Ok(())
    }

    /// Reverse the cells of `[start, end)` in place.
    pub fn reverse_cells(&mut self, start: usize, end: usize) -> anyhow::Result<()> {
        let (mut lo, mut hi) = (start, end);
        while lo + 1 < hi {
            hi -= 1;
            let a = self.mem.read_cell(lo)?;
            let b = self.mem.read_cell(hi)?;
            self.mem.write_cell(lo, b)?;
            self.mem.write_cell(hi, a)?;
            lo += 1;
        }
        Ok(())
    }

    /// Rotate `[start, end)` left by `k` cells with three reversals.
    pub fn rotate_left(&mut self, start: usize, end: usize, k: usize) -> anyhow::Result<()> {
        let len = end - start;
        if len == 0 || k % len == 0 {
            return Ok(());
        }
        let k = k % len;
        self.reverse_cells(start, start + k)?;
        self.reverse_cells(start + k, end)?;
        self.reverse_cells(start, end)
    }

    // --- heap ---

    /// Allocate `n` contiguous heap cells, returning the first cell.
    pub fn alloc_data(&mut self, n: usize) -> anyhow::Result<usize> {
        let end = self
            .heap_top
            .checked_add(n)
            .ok_or_else(|| vm_err(ErrorKind::HeapExhausted, "heap allocation overflows"))?;
        vm_ensure!(
            end <= DATA_BASE + DATA_CELLS,
            HeapExhausted,
            "heap cannot fit {n} cells"
        );
        let start = self.heap_top;
        self.heap_top = end;
        Ok(start)
    }

    /// Drain the text produced by the print operations.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}
