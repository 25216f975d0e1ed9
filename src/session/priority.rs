//! Per-eye macroblock priority buffers
//!
//! Object-level streaming feeds the encoder a priority per 16x16 macroblock.
//! The session keeps its own copy for each eye so the external source can
//! reuse its buffer as soon as a frame has been handed over.

use tracing::warn;

use crate::model::view::StreamingSize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityBuffers {
    left: Vec<u32>,
    right: Vec<u32>,
}

impl PriorityBuffers {
    pub fn new(size: StreamingSize) -> PriorityBuffers {
        let len = size.macroblock_count();
        PriorityBuffers {
            left: vec![0; len],
            right: vec![0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn left(&self) -> &[u32] {
        &self.left
    }

    pub fn right(&self) -> &[u32] {
        &self.right
    }

    /// Copy the first `len()` values of `source` into both eyes.
    ///
    /// A source shorter than the buffers is skipped and `false` returned;
    /// trailing values beyond `len()` are ignored.
    pub fn refresh(&mut self, source: &[u32]) -> bool {
        let len = self.len();
        if source.len() < len {
            warn!(
                "Priority source has {} macroblocks, expected {}; skipping frame",
                source.len(),
                len
            );
            return false;
        }

        self.left.copy_from_slice(&source[..len]);
        self.right.copy_from_slice(&source[..len]);
        true
    }
}
