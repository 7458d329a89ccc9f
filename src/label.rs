//! Bytecode positions and basic block identity. A [`Label`] is a cheap
//! copyable id; all mutable state (resolution, forward references, control
//! flow edges, frame bookkeeping) lives in a [`LabelState`] owned by the
//! method writer that the label is used in. Ids only need to be unique within
//! one method body.

use crate::bytes::ByteVector;
use crate::frame::Frame;
use crate::opcodes::{IFEQ, IFNONNULL, IFNULL, JSR, WIDE_JUMP_DELTA, WIDE_NULL_JUMP_DELTA};

/// A position in a method's bytecode, usable before the position is known.
/// Equality is by id, not by eventual offset.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

impl Label {
    /// Creates a label with a caller-chosen id. Ids must be unique within
    /// one method body; `MethodWriter::new_label` hands out ids from the top
    /// of the id space, so low ids are always safe here.
    pub fn new(id: u32) -> Self {
        Label(id)
    }
}

/// Sentinel id terminating an intrusive work list. A state whose
/// `next_list_element` is `Some(EMPTY_LIST)` is the list tail; `None` means
/// the label is in no list at all. Every CFG algorithm restores `None` on all
/// labels before returning.
pub(crate) const EMPTY_LIST: Label = Label(u32::MAX);

// Label state flags.
pub(crate) const FLAG_JUMP_TARGET: u16 = 2;
pub(crate) const FLAG_RESOLVED: u16 = 4;
pub(crate) const FLAG_REACHABLE: u16 = 8;
pub(crate) const FLAG_SUBROUTINE_CALLER: u16 = 16;
pub(crate) const FLAG_SUBROUTINE_START: u16 = 32;
pub(crate) const FLAG_SUBROUTINE_END: u16 = 64;

/// Edge info marking an exception edge under max-stack computation; any other
/// value is the relative operand stack size at the jump site. Under frame
/// computation `info` is 0 for jump edges and the packed abstract type of the
/// caught exception for handler edges.
pub(crate) const EDGE_EXCEPTION: i32 = i32::MAX;

#[derive(Debug, Copy, Clone)]
pub(crate) struct Edge {
    pub info: i32,
    pub successor: Label,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ReferenceKind16or32 {
    Short,
    Wide,
}

/// A jump emitted before its target label was resolved: the opcode lives at
/// `source_offset` and the placeholder offset bytes at `patch_offset`.
#[derive(Debug, Copy, Clone)]
pub(crate) struct ForwardReference {
    pub source_offset: u32,
    pub kind: ReferenceKind16or32,
    pub patch_offset: u32,
}

/// All writer-side state of one label.
#[derive(Debug, Default)]
pub(crate) struct LabelState {
    pub flags: u16,
    pub bytecode_offset: u32,
    /// Source line numbers attached to this label; rarely more than one.
    pub line_numbers: Vec<u16>,
    pub forward_references: Vec<ForwardReference>,

    // Control flow graph fields, used only when maxs or frames are computed.
    pub input_stack_size: u16,
    pub output_stack_size: i16,
    pub output_stack_max: u16,
    pub subroutine_id: u16,
    pub frame: Option<Frame>,
    pub next_basic_block: Option<Label>,
    pub outgoing_edges: Vec<Edge>,
    pub next_list_element: Option<Label>,

    /// When several labels are visited at the same bytecode offset under
    /// frame computation, the first one visited is canonical and owns the
    /// shared frame; the others redirect here.
    pub canonical: Option<Label>,
}

impl LabelState {
    pub fn is_resolved(&self) -> bool {
        self.flags & FLAG_RESOLVED != 0
    }

    /// Emits a 16 or 32 bit offset to this label from `source_offset`. For a
    /// backward reference the real offset is written; otherwise a -1
    /// placeholder is appended and a forward reference recorded for
    /// [`Self::resolve`] to patch.
    pub fn put(&mut self, code: &mut ByteVector, source_offset: u32, wide: bool) {
        if self.is_resolved() {
            let delta = self.bytecode_offset as i64 - source_offset as i64;
            if wide {
                code.put_i32(delta as i32);
            } else {
                code.put_i16(delta as i16);
            }
        } else {
            let patch_offset = code.len() as u32;
            let kind = if wide {
                ReferenceKind16or32::Wide
            } else {
                ReferenceKind16or32::Short
            };
            self.forward_references.push(ForwardReference {
                source_offset,
                kind,
                patch_offset,
            });
            if wide {
                code.put_i32(-1);
            } else {
                code.put_i16(-1);
            }
        }
    }

    /// Fixes this label at `bytecode_offset` and patches every forward
    /// reference. Returns true when a 16 bit reference overflowed and its
    /// source instruction was rewritten to an internal wide opcode; the
    /// caller must then round-trip the finished class to materialize real
    /// `goto_w` sequences.
    pub fn resolve(&mut self, code: &mut ByteVector, bytecode_offset: u32) -> bool {
        debug_assert!(!self.is_resolved());
        let mut has_internal_wide_branches = false;
        self.flags |= FLAG_RESOLVED;
        self.bytecode_offset = bytecode_offset;

        for reference in &self.forward_references {
            let delta = bytecode_offset as i64 - reference.source_offset as i64;
            match reference.kind {
                ReferenceKind16or32::Short => {
                    if (i16::MIN as i64..=i16::MAX as i64).contains(&delta) {
                        code.set_i16(reference.patch_offset as usize, delta as i16);
                    } else {
                        // Rewrite the source opcode into its internal wide
                        // form; the unsigned 16 bit delta is kept for the
                        // expansion pass. Conditional opcodes and jsr share
                        // one rebasing, ifnull/ifnonnull need another to stay
                        // within a byte.
                        has_internal_wide_branches = true;
                        let source = reference.source_offset as usize;
                        let opcode = code.get_u8(source);
                        if opcode == IFNULL || opcode == IFNONNULL {
                            code.set_u8(source, opcode + WIDE_NULL_JUMP_DELTA);
                        } else {
                            debug_assert!(opcode >= IFEQ && opcode <= JSR);
                            code.set_u8(source, opcode + WIDE_JUMP_DELTA);
                        }
                        code.set_u16(reference.patch_offset as usize, delta as u16);
                    }
                }
                ReferenceKind16or32::Wide => {
                    code.set_i32(reference.patch_offset as usize, delta as i32);
                }
            }
        }
        self.forward_references.clear();
        has_internal_wide_branches
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::opcodes::{IFNE, NOP, WIDE_JUMP_DELTA};

    #[test]
    fn backward_reference_writes_offset_directly() {
        let mut code = ByteVector::new();
        let mut state = LabelState::default();
        assert!(!state.resolve(&mut code, 0));
        code.put_u8(IFNE);
        let source = 0u32;
        state.put(&mut code, source, false);
        // Offset is target - source = 0 - 0 = 0 at patch bytes 1..3.
        assert_eq!(code.as_slice(), &[IFNE, 0, 0]);
    }

    #[test]
    fn forward_reference_is_patched_on_resolve() {
        let mut code = ByteVector::new();
        let mut state = LabelState::default();
        code.put_u8(IFNE);
        state.put(&mut code, 0, false);
        code.put_u8(NOP).put_u8(NOP).put_u8(NOP);
        assert_eq!(code.get_u16(1), 0xFFFF);
        let wide = state.resolve(&mut code, 6);
        assert!(!wide);
        assert_eq!(code.get_u16(1), 6);
        assert!(state.is_resolved());
        assert_eq!(state.bytecode_offset, 6);
    }

    #[test]
    fn oversized_forward_reference_rewrites_opcode() {
        let mut code = ByteVector::new();
        let mut state = LabelState::default();
        code.put_u8(IFNE);
        state.put(&mut code, 0, false);
        for _ in 0..40_000 {
            code.put_u8(NOP);
        }
        let needs_round_trip = state.resolve(&mut code, 40_003);
        assert!(needs_round_trip);
        assert_eq!(code.get_u8(0), IFNE + WIDE_JUMP_DELTA);
        assert_eq!(code.get_u16(1), 40_003);
    }
}
