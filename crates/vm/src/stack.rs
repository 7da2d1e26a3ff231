//! The call stack: a fixed byte arena that grows toward lower addresses.
//!
//! Frames are pushed by the invoke protocol as
//! `return pc, frame pointer, v0 .. vN-1, N` and popped in mirror order.

use thiserror::Error;

use crate::registers::{RegisterFile, NUM_REGISTERS};

const WORD: usize = 4;

/// Failures of the call stack arena.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("stack overflow")]
    Overflow,

    #[error("stack underflow")]
    Underflow,

    #[error("call depth exceeds {limit}")]
    TooDeep { limit: usize },

    #[error("saved register count {count} exceeds the register file")]
    CorruptFrame { count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStack {
    arena: Vec<u8>,
    sp: usize,
    fp: usize,
}

impl CallStack {
    pub fn new(size: usize) -> Self {
        Self {
            arena: vec![0; size],
            sp: size,
            fp: size,
        }
    }

    /// Reset both pointers to the top of the arena.
    pub fn reset(&mut self) {
        self.arena.fill(0);
        self.sp = self.arena.len();
        self.fp = self.arena.len();
    }

    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn fp(&self) -> usize {
        self.fp
    }

    /// Bytes currently in use.
    pub fn used(&self) -> usize {
        self.arena.len() - self.sp
    }

    pub fn push(&mut self, word: [u8; 4]) -> Result<(), StackError> {
        if self.sp < WORD {
            return Err(StackError::Overflow);
        }
        self.sp -= WORD;
        self.arena[self.sp..self.sp + WORD].copy_from_slice(&word);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<[u8; 4], StackError> {
        let end = self.sp + WORD;
        let bytes = self.arena.get(self.sp..end).ok_or(StackError::Underflow)?;
        let word = [bytes[0], bytes[1], bytes[2], bytes[3]];
        self.sp = end;
        Ok(word)
    }

    fn push_u32(&mut self, value: u32) -> Result<(), StackError> {
        self.push(value.to_le_bytes())
    }

    fn pop_u32(&mut self) -> Result<u32, StackError> {
        self.pop().map(u32::from_le_bytes)
    }

    /// Save the caller's state: return pc, frame pointer and the first
    /// `count` registers. The frame pointer then marks the new top.
    pub fn push_frame(
        &mut self,
        return_pc: usize,
        registers: &RegisterFile,
        count: usize,
    ) -> Result<(), StackError> {
        let count = count.min(NUM_REGISTERS);
        if (count + 3) * WORD > self.sp {
            return Err(StackError::Overflow);
        }
        self.push_u32(return_pc as u32)?;
        self.push_u32(self.fp as u32)?;
        for id in 0..count {
            self.push(registers.load(id).unwrap_or_default())?;
        }
        self.push_u32(count as u32)?;
        self.fp = self.sp;
        Ok(())
    }

    /// Restore the registers and frame pointer saved by the matching
    /// [`push_frame`](Self::push_frame) and return the saved pc.
    pub fn pop_frame(&mut self, registers: &mut RegisterFile) -> Result<usize, StackError> {
        self.sp = self.fp;
        let count = self.pop_u32()? as usize;
        if count > NUM_REGISTERS {
            return Err(StackError::CorruptFrame { count });
        }
        for id in (0..count).rev() {
            let word = self.pop()?;
            registers.store(id, word);
        }
        self.fp = self.pop_u32()? as usize;
        Ok(self.pop_u32()? as usize)
    }
}
