//! Assembles one `method_info` structure, and in particular its `Code`
//! attribute, from visitor events. Instructions are appended to a byte
//! buffer as they arrive; jumps to unresolved labels write placeholders that
//! are patched when the label is visited. Depending on the computation mode
//! the writer also maintains a control flow graph over basic blocks, from
//! which `visit_maxs` derives max_stack/max_locals (a data flow over stack
//! size deltas) or full stack map frames (a fixpoint over abstract frames).

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::annotation::{
    put_annotation, put_element_value, Annotation, AnnotationSet, AnnotationValue, TypeAnnotation,
    TypePath,
};
use crate::attribute::Attribute;
use crate::bytes::ByteVector;
use crate::constant::{Constant, Handle};
use crate::descriptor::{argument_types, method_descriptor_sizes};
use crate::error::{Error, Result};
use crate::frame::{
    collapsed, put_verification_type, type_from_descriptor, type_from_internal_name, Frame,
    InsnOperand, Ty,
};
use crate::label::{
    Edge, Label, LabelState, EDGE_EXCEPTION, EMPTY_LIST, FLAG_JUMP_TARGET, FLAG_REACHABLE,
    FLAG_RESOLVED, FLAG_SUBROUTINE_CALLER, FLAG_SUBROUTINE_END, FLAG_SUBROUTINE_START,
};
use crate::opcodes::*;
use crate::symbol::SymbolTable;
use crate::version::{V1_5, V1_6};
use crate::visitor::{FrameItem, FrameKind, MethodSourceInfo, MethodVisitor};

/// What `visit_maxs` computes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Compute {
    /// Trust the caller's max_stack/max_locals and frames.
    Nothing,
    /// Data flow over per-block stack size deltas.
    MaxStackAndLocal,
    /// Linear scan re-anchored at every visited frame; used instead of the
    /// CFG data flow when the class version guarantees frames are present.
    MaxStackAndLocalFromFrames,
    /// Full two-phase frame computation plus maxs.
    AllFrames,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    PreCode,
    InCode,
    PostCode,
    Ended,
}

/// A bound of an exception table range: a label while the method is being
/// built, or a raw offset for the pieces produced when an unreachable block
/// is excised from a range.
#[derive(Debug, Copy, Clone)]
enum Bound {
    At(Label),
    Offset(u32),
}

#[derive(Debug, Clone)]
struct Handler {
    start: Bound,
    end: Bound,
    handler: Label,
    catch_type_index: u16,
    catch_type: Option<String>,
}

pub struct MethodWriter {
    symbols: Rc<RefCell<SymbolTable>>,
    access: AccessFlags,
    name: String,
    name_index: u16,
    descriptor: String,
    descriptor_index: u16,
    signature: Option<String>,
    signature_index: u16,
    exception_names: Vec<String>,
    exception_indexes: Vec<u16>,

    compute: Compute,
    state: State,
    has_code: bool,

    code: ByteVector,
    max_stack: u16,
    max_locals: u16,
    last_bytecode_offset: u32,

    labels: HashMap<Label, LabelState>,
    next_internal_label: u32,
    first_basic_block: Option<Label>,
    last_basic_block: Option<Label>,
    current_basic_block: Option<Label>,

    relative_stack_size: i32,
    max_relative_stack_size: i32,

    has_subroutines: bool,
    has_internal_wide_branches: bool,

    handlers: Vec<Handler>,

    // Stack map emission state.
    stack_map_entries: ByteVector,
    stack_map_count: u16,
    previous_frame_offset: i32,
    /// Locals of the last written frame in emitted (collapsed) form, the
    /// baseline compressed deltas are computed against.
    emitted_frame_locals: Vec<Ty>,
    last_visited_frame_offset: Option<u32>,
    /// Slot size of each local implied by visited frames, for the
    /// frame-anchored maxs mode (chop must remove exactly what append
    /// added).
    frame_local_sizes: Vec<u8>,

    // Debug tables.
    line_numbers: ByteVector,
    line_number_count: u16,
    local_variables: ByteVector,
    local_variable_count: u16,
    local_variable_types: ByteVector,
    local_variable_type_count: u16,

    // Method-level metadata.
    parameters: ByteVector,
    parameters_count: u8,
    annotations: AnnotationSet,
    code_annotations: AnnotationSet,
    parameter_annotations_visible: Vec<Vec<Annotation>>,
    parameter_annotations_invisible: Vec<Vec<Annotation>>,
    annotable_count_visible: u16,
    annotable_count_invisible: u16,
    annotation_default: Option<AnnotationValue>,
    attributes: Vec<Attribute>,

    /// Byte range of the source `method_info` when this method is emitted by
    /// verbatim copy instead of event replay.
    source_copy: Option<(usize, usize)>,
}

impl MethodWriter {
    pub(crate) fn new(
        symbols: Rc<RefCell<SymbolTable>>,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        exceptions: &[&str],
        compute: Compute,
    ) -> Result<Self> {
        let (name_index, descriptor_index, signature_index, exception_indexes) = {
            let mut table = symbols.borrow_mut();
            let name_index = table.add_constant_utf8(name)?;
            let descriptor_index = table.add_constant_utf8(descriptor)?;
            let signature_index = match signature {
                Some(signature) => table.add_constant_utf8(signature)?,
                None => 0,
            };
            let mut exception_indexes = Vec::with_capacity(exceptions.len());
            for exception in exceptions {
                exception_indexes.push(table.add_constant_class(exception)?);
            }
            (name_index, descriptor_index, signature_index, exception_indexes)
        };

        let (argument_slots, _) = method_descriptor_sizes(descriptor)?;
        let implicit_this = !access.contains(AccessFlags::STATIC) as usize;
        let max_locals = (argument_slots + implicit_this) as u16;

        Ok(MethodWriter {
            symbols,
            access,
            name: name.to_owned(),
            name_index,
            descriptor: descriptor.to_owned(),
            descriptor_index,
            signature: signature.map(str::to_owned),
            signature_index,
            exception_names: exceptions.iter().map(|e| (*e).to_owned()).collect(),
            exception_indexes,
            compute,
            state: State::PreCode,
            has_code: false,
            code: ByteVector::new(),
            max_stack: 0,
            max_locals,
            last_bytecode_offset: 0,
            labels: HashMap::new(),
            next_internal_label: u32::MAX - 1,
            first_basic_block: None,
            last_basic_block: None,
            current_basic_block: None,
            relative_stack_size: 0,
            max_relative_stack_size: 0,
            has_subroutines: false,
            has_internal_wide_branches: false,
            handlers: Vec::new(),
            stack_map_entries: ByteVector::new(),
            stack_map_count: 0,
            previous_frame_offset: -1,
            emitted_frame_locals: Vec::new(),
            last_visited_frame_offset: None,
            frame_local_sizes: Vec::new(),
            line_numbers: ByteVector::new(),
            line_number_count: 0,
            local_variables: ByteVector::new(),
            local_variable_count: 0,
            local_variable_types: ByteVector::new(),
            local_variable_type_count: 0,
            parameters: ByteVector::new(),
            parameters_count: 0,
            annotations: AnnotationSet::default(),
            code_annotations: AnnotationSet::default(),
            parameter_annotations_visible: Vec::new(),
            parameter_annotations_invisible: Vec::new(),
            annotable_count_visible: 0,
            annotable_count_invisible: 0,
            annotation_default: None,
            attributes: Vec::new(),
            source_copy: None,
        })
    }

    /// Allocates a label guaranteed not to collide with caller-created ones
    /// in this method (internal ids grow downward from the top of the id
    /// space).
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_internal_label);
        self.next_internal_label -= 1;
        label
    }

    pub(crate) fn has_internal_wide_branches(&self) -> bool {
        self.has_internal_wide_branches
    }

    pub(crate) fn max_stack(&self) -> u16 {
        self.max_stack
    }

    pub(crate) fn max_locals(&self) -> u16 {
        self.max_locals
    }

    #[cfg(test)]
    pub(crate) fn code_bytes(&self) -> &[u8] {
        self.code.as_slice()
    }

    fn require_in_code(&self) -> Result<()> {
        if self.state != State::InCode {
            return Err(Error::state("instruction event outside visit_code"));
        }
        Ok(())
    }

    fn needs_cfg(&self) -> bool {
        matches!(self.compute, Compute::AllFrames | Compute::MaxStackAndLocal)
    }

    // ------------------------------------------------------------------
    // Basic block management
    // ------------------------------------------------------------------

    fn canonical(&self, label: Label) -> Label {
        match self.labels.get(&label).and_then(|state| state.canonical) {
            Some(canonical) => canonical,
            None => label,
        }
    }

    fn append_basic_block(&mut self, label: Label) {
        match self.last_basic_block {
            Some(last) => {
                self.labels
                    .get_mut(&last)
                    .expect("chained block has state")
                    .next_basic_block = Some(label)
            }
            None => self.first_basic_block = Some(label),
        }
        self.last_basic_block = Some(label);
    }

    fn add_successor(&mut self, info: i32, successor: Label) {
        if let Some(current) = self.current_basic_block {
            self.labels
                .get_mut(&current)
                .expect("current block has state")
                .outgoing_edges
                .push(Edge { info, successor });
        }
    }

    /// Ends the current block after an unconditional transfer. Under frame
    /// computation a fresh (so far unreachable) block is opened at the
    /// current offset so any following dead instructions belong to a block
    /// that phase two can replace.
    fn end_current_basic_block_with_no_successor(&mut self) {
        match self.compute {
            Compute::AllFrames => {
                let label = self.new_label();
                let offset = self.code.len() as u32;
                let state = self.labels.entry(label).or_insert_with(LabelState::default);
                state.flags |= FLAG_RESOLVED;
                state.bytecode_offset = offset;
                state.frame = Some(Frame::new());
                self.append_basic_block(label);
                self.current_basic_block = None;
            }
            Compute::MaxStackAndLocal => {
                self.seal_current_block();
                self.current_basic_block = None;
            }
            _ => {}
        }
    }

    /// Records the relative stack statistics of the current block (max-stack
    /// mode).
    fn seal_current_block(&mut self) {
        if let Some(current) = self.current_basic_block {
            let max = self.max_relative_stack_size.max(0) as u16;
            let size = self.relative_stack_size as i16;
            let state = self
                .labels
                .get_mut(&current)
                .expect("current block has state");
            state.output_stack_max = max;
            state.output_stack_size = size;
        }
    }

    fn update_max_locals(&mut self, slot_past_end: u16) {
        if slot_past_end > self.max_locals {
            self.max_locals = slot_past_end;
        }
    }

    fn add_stack_delta(&mut self, delta: i32) {
        self.relative_stack_size += delta;
        if self.relative_stack_size > self.max_relative_stack_size {
            self.max_relative_stack_size = self.relative_stack_size;
        }
    }

    /// Runs the abstract interpreter of the current block for one
    /// instruction (frame computation only).
    fn execute_frame(&mut self, opcode: u8, arg: i32, operand: InsnOperand<'_>) -> Result<()> {
        if let Some(current) = self.current_basic_block {
            let mut table = self.symbols.borrow_mut();
            let state = self
                .labels
                .get_mut(&current)
                .expect("current block has state");
            state
                .frame
                .as_mut()
                .expect("current block has a frame")
                .execute(opcode, arg, operand, &mut table)?;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Visitor implementation
// ----------------------------------------------------------------------

impl MethodVisitor for MethodWriter {
    fn visit_parameter(&mut self, name: Option<&str>, access: AccessFlags) -> Result<()> {
        let name_index = match name {
            Some(name) => self.symbols.borrow_mut().add_constant_utf8(name)?,
            None => 0,
        };
        self.parameters.put_u16(name_index).put_u16(access.file_bits());
        self.parameters_count += 1;
        Ok(())
    }

    fn visit_annotation_default(&mut self, value: &AnnotationValue) -> Result<()> {
        self.annotation_default = Some(value.clone());
        Ok(())
    }

    fn visit_annotation(&mut self, annotation: &Annotation, visible: bool) -> Result<()> {
        self.annotations.add(annotation.clone(), visible);
        Ok(())
    }

    fn visit_type_annotation(
        &mut self,
        type_annotation: &TypeAnnotation,
        visible: bool,
    ) -> Result<()> {
        self.annotations
            .add_type_annotation(type_annotation.clone(), visible);
        Ok(())
    }

    fn visit_annotable_parameter_count(&mut self, count: u16, visible: bool) -> Result<()> {
        if visible {
            self.annotable_count_visible = count;
        } else {
            self.annotable_count_invisible = count;
        }
        Ok(())
    }

    fn visit_parameter_annotation(
        &mut self,
        parameter: u16,
        annotation: &Annotation,
        visible: bool,
    ) -> Result<()> {
        let list = if visible {
            &mut self.parameter_annotations_visible
        } else {
            &mut self.parameter_annotations_invisible
        };
        if list.len() <= parameter as usize {
            list.resize(parameter as usize + 1, Vec::new());
        }
        list[parameter as usize].push(annotation.clone());
        Ok(())
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.attributes.push(attribute.clone());
        Ok(())
    }

    fn visit_method_source(&mut self, source: &MethodSourceInfo<'_>) -> bool {
        if self.state != State::PreCode
            || self.compute == Compute::AllFrames
            || !self.code.is_empty()
        {
            return false;
        }
        let can_copy = {
            let table = self.symbols.borrow();
            let wants_synthetic = self.access.contains(AccessFlags::SYNTHETIC)
                && table.major_version() < V1_5.major();
            table.source_id() == Some(source.source_id)
                && self.signature.as_deref() == source.signature
                && self.exception_names.len() == source.exceptions.len()
                && self
                    .exception_names
                    .iter()
                    .zip(source.exceptions.iter())
                    .all(|(a, b)| a == b)
                && wants_synthetic == source.has_synthetic_attribute
                && self.access.contains(AccessFlags::DEPRECATED)
                    == source.has_deprecated_attribute
        };
        if !can_copy {
            return false;
        }
        self.source_copy = Some((source.info_offset, source.info_length));
        self.state = State::Ended;
        true
    }

    fn visit_code(&mut self) -> Result<()> {
        if self.state != State::PreCode {
            return Err(Error::state("visit_code after code or end"));
        }
        self.state = State::InCode;
        self.has_code = true;
        if self.needs_cfg() {
            let first = self.new_label();
            if self.compute == Compute::AllFrames {
                self.labels
                    .entry(first)
                    .or_insert_with(LabelState::default)
                    .frame = Some(Frame::new());
            }
            self.visit_label(first)?;
        }
        Ok(())
    }

    fn visit_frame(
        &mut self,
        kind: FrameKind,
        n_local: u16,
        locals: &[FrameItem],
        n_stack: u16,
        stack: &[FrameItem],
    ) -> Result<()> {
        self.require_in_code()?;
        if self.compute == Compute::AllFrames {
            // Frames are recomputed from scratch; visited ones are dropped.
            return Ok(());
        }

        let offset = self.code.len() as u32;
        if self.last_visited_frame_offset == Some(offset) {
            return Err(Error::state(
                "two frames visited at the same bytecode offset",
            ));
        }
        self.last_visited_frame_offset = Some(offset);

        if self.compute == Compute::MaxStackAndLocalFromFrames {
            // Anchor the linear size tracking, then emit the frame as usual.
            self.anchor_sizes_at_frame(kind, n_local, locals, stack);
        }

        if self.emitted_frame_locals.is_empty() && self.stack_map_count == 0 {
            self.init_implicit_frame_locals()?;
        }
        let packed_locals = self.pack_frame_items(locals)?;
        let packed_stack = self.pack_frame_items(stack)?;
        let use_table = self.symbols.borrow().major_version() >= V1_6.major();

        match kind {
            FrameKind::New => {
                self.put_frame_entry(offset, &packed_locals, &packed_stack, use_table)?;
            }
            FrameKind::Full => {
                if use_table {
                    let delta = self.frame_offset_delta(offset);
                    self.stack_map_entries.put_u8(255).put_u16(delta);
                    self.put_frame_types(&packed_locals, true)?;
                    self.put_frame_types(&packed_stack, true)?;
                    self.finish_frame_entry(offset, packed_locals);
                } else {
                    self.put_uncompressed_frame(offset, &packed_locals, &packed_stack)?;
                }
            }
            FrameKind::Append => {
                let mut merged = self.emitted_frame_locals.clone();
                merged.extend_from_slice(&packed_locals);
                if use_table {
                    let delta = self.frame_offset_delta(offset);
                    self.stack_map_entries
                        .put_u8(251 + packed_locals.len() as u8)
                        .put_u16(delta);
                    self.put_frame_types(&packed_locals, false)?;
                    self.finish_frame_entry(offset, merged);
                } else {
                    self.put_uncompressed_frame(offset, &merged, &[])?;
                }
            }
            FrameKind::Chop => {
                let keep = self
                    .emitted_frame_locals
                    .len()
                    .saturating_sub(n_local as usize);
                let merged: Vec<Ty> = self.emitted_frame_locals[..keep].to_vec();
                if use_table {
                    let delta = self.frame_offset_delta(offset);
                    self.stack_map_entries
                        .put_u8(251 - n_local as u8)
                        .put_u16(delta);
                    self.finish_frame_entry(offset, merged);
                } else {
                    self.put_uncompressed_frame(offset, &merged, &[])?;
                }
            }
            FrameKind::Same => {
                if use_table {
                    let delta = self.frame_offset_delta(offset);
                    if delta < 64 {
                        self.stack_map_entries.put_u8(delta as u8);
                    } else {
                        self.stack_map_entries.put_u8(251).put_u16(delta);
                    }
                    let locals = self.emitted_frame_locals.clone();
                    self.finish_frame_entry(offset, locals);
                } else {
                    let locals = self.emitted_frame_locals.clone();
                    self.put_uncompressed_frame(offset, &locals, &[])?;
                }
            }
            FrameKind::Same1 => {
                let _ = n_stack;
                if use_table {
                    let delta = self.frame_offset_delta(offset);
                    if delta < 64 {
                        self.stack_map_entries.put_u8(64 + delta as u8);
                    } else {
                        self.stack_map_entries.put_u8(247).put_u16(delta);
                    }
                    self.put_frame_types(&packed_stack, false)?;
                    let locals = self.emitted_frame_locals.clone();
                    self.finish_frame_entry(offset, locals);
                } else {
                    let locals = self.emitted_frame_locals.clone();
                    self.put_uncompressed_frame(offset, &locals, &packed_stack)?;
                }
            }
        }
        Ok(())
    }

    fn visit_insn(&mut self, opcode: u8) -> Result<()> {
        self.require_in_code()?;
        self.last_bytecode_offset = self.code.len() as u32;
        self.code.put_u8(opcode);
        match self.compute {
            Compute::AllFrames => self.execute_frame(opcode, 0, InsnOperand::None)?,
            Compute::Nothing => {}
            _ => self.add_stack_delta(STACK_SIZE_DELTA[opcode as usize] as i32),
        }
        if (IRETURN..=RETURN).contains(&opcode) || opcode == ATHROW {
            self.end_current_basic_block_with_no_successor();
        }
        Ok(())
    }

    fn visit_int_insn(&mut self, opcode: u8, operand: i32) -> Result<()> {
        self.require_in_code()?;
        self.last_bytecode_offset = self.code.len() as u32;
        match opcode {
            BIPUSH => {
                self.code.put_u8(BIPUSH).put_i8(operand as i8);
            }
            SIPUSH => {
                self.code.put_u8(SIPUSH).put_i16(operand as i16);
            }
            NEWARRAY => {
                self.code.put_u8(NEWARRAY).put_u8(operand as u8);
            }
            _ => return Err(Error::state("visit_int_insn with a non-immediate opcode")),
        }
        match self.compute {
            Compute::AllFrames => self.execute_frame(opcode, operand, InsnOperand::None)?,
            Compute::Nothing => {}
            _ => self.add_stack_delta(STACK_SIZE_DELTA[opcode as usize] as i32),
        }
        Ok(())
    }

    fn visit_var_insn(&mut self, opcode: u8, var: u16) -> Result<()> {
        self.require_in_code()?;
        self.last_bytecode_offset = self.code.len() as u32;

        if opcode == RET && self.compute == Compute::AllFrames {
            return Err(Error::unsupported("ret with frame computation enabled"));
        }

        if opcode == RET {
            if var > 255 {
                self.code.put_u8(WIDE).put_u8(RET).put_u16(var);
            } else {
                self.code.put_u8(RET).put_u8(var as u8);
            }
        } else if var < 4 {
            let packed = if opcode < ISTORE {
                ILOAD_0 + ((opcode - ILOAD) << 2) + var as u8
            } else {
                ISTORE_0 + ((opcode - ISTORE) << 2) + var as u8
            };
            self.code.put_u8(packed);
        } else if var > 255 {
            self.code.put_u8(WIDE).put_u8(opcode).put_u16(var);
        } else {
            self.code.put_u8(opcode).put_u8(var as u8);
        }

        match self.compute {
            Compute::AllFrames => self.execute_frame(opcode, var as i32, InsnOperand::None)?,
            Compute::Nothing => {}
            _ => {
                if opcode == RET {
                    if let Some(current) = self.current_basic_block {
                        let size = self.relative_stack_size as i16;
                        let max = self.max_relative_stack_size.max(0) as u16;
                        let state = self
                            .labels
                            .get_mut(&current)
                            .expect("current block has state");
                        state.flags |= FLAG_SUBROUTINE_END;
                        state.output_stack_size = size;
                        state.output_stack_max = max;
                    }
                    self.current_basic_block = None;
                } else {
                    self.add_stack_delta(STACK_SIZE_DELTA[opcode as usize] as i32);
                }
            }
        }
        if self.compute != Compute::Nothing {
            let wide_slot = matches!(opcode, LLOAD | DLOAD | LSTORE | DSTORE);
            self.update_max_locals(var + 1 + wide_slot as u16);
        }
        Ok(())
    }

    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) -> Result<()> {
        self.require_in_code()?;
        self.last_bytecode_offset = self.code.len() as u32;
        let index = self.symbols.borrow_mut().add_constant_class(type_name)?;
        self.code.put_u8(opcode).put_u16(index);
        match self.compute {
            Compute::AllFrames => {
                // `new` tags the pushed uninitialized type with its own
                // bytecode offset.
                let arg = self.last_bytecode_offset as i32;
                self.execute_frame(opcode, arg, InsnOperand::TypeName(type_name))?;
            }
            Compute::Nothing => {}
            _ => self.add_stack_delta(STACK_SIZE_DELTA[opcode as usize] as i32),
        }
        Ok(())
    }

    fn visit_field_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<()> {
        self.require_in_code()?;
        self.last_bytecode_offset = self.code.len() as u32;
        let index = self
            .symbols
            .borrow_mut()
            .add_constant_fieldref(owner, name, descriptor)?;
        self.code.put_u8(opcode).put_u16(index);
        match self.compute {
            Compute::AllFrames => {
                self.execute_frame(opcode, 0, InsnOperand::Member { name, descriptor })?
            }
            Compute::Nothing => {}
            _ => {
                let size: i32 = match descriptor.as_bytes()[0] {
                    b'J' | b'D' => 2,
                    _ => 1,
                };
                let delta = match opcode {
                    GETSTATIC => size,
                    PUTSTATIC => -size,
                    GETFIELD => size - 1,
                    _ => -size - 1, // putfield
                };
                self.add_stack_delta(delta);
            }
        }
        Ok(())
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<()> {
        self.require_in_code()?;
        self.last_bytecode_offset = self.code.len() as u32;
        let index = self
            .symbols
            .borrow_mut()
            .add_constant_methodref(owner, name, descriptor, is_interface)?;
        let (argument_slots, return_slots) = method_descriptor_sizes(descriptor)?;
        if opcode == INVOKEINTERFACE {
            self.code
                .put_u8(INVOKEINTERFACE)
                .put_u16(index)
                .put_u8(argument_slots as u8 + 1)
                .put_u8(0);
        } else {
            self.code.put_u8(opcode).put_u16(index);
        }
        match self.compute {
            Compute::AllFrames => {
                self.execute_frame(opcode, 0, InsnOperand::Member { name, descriptor })?
            }
            Compute::Nothing => {}
            _ => {
                let receiver = (opcode != INVOKESTATIC) as i32;
                self.add_stack_delta(return_slots as i32 - argument_slots as i32 - receiver);
            }
        }
        Ok(())
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: &Handle,
        bootstrap_arguments: &[Constant],
    ) -> Result<()> {
        self.require_in_code()?;
        self.last_bytecode_offset = self.code.len() as u32;
        let index = self.symbols.borrow_mut().add_constant_invoke_dynamic(
            name,
            descriptor,
            bootstrap_method,
            bootstrap_arguments,
        )?;
        self.code.put_u8(INVOKEDYNAMIC).put_u16(index).put_u16(0);
        match self.compute {
            Compute::AllFrames => {
                self.execute_frame(INVOKEDYNAMIC, 0, InsnOperand::Member { name, descriptor })?
            }
            Compute::Nothing => {}
            _ => {
                let (argument_slots, return_slots) = method_descriptor_sizes(descriptor)?;
                self.add_stack_delta(return_slots as i32 - argument_slots as i32);
            }
        }
        Ok(())
    }

    fn visit_jump_insn(&mut self, opcode: u8, label: Label) -> Result<()> {
        self.require_in_code()?;
        self.last_bytecode_offset = self.code.len() as u32;

        if (opcode == JSR || opcode == JSR_W) && self.compute == Compute::AllFrames {
            return Err(Error::unsupported("jsr with frame computation enabled"));
        }

        let source = self.code.len() as u32;
        if opcode == GOTO_W || opcode == JSR_W {
            // Already-wide forms pass straight through.
            self.code.put_u8(opcode);
            let state = self.labels.entry(label).or_insert_with(LabelState::default);
            state.put(&mut self.code, source, true);
            return self.finish_jump_accounting(if opcode == GOTO_W { GOTO } else { JSR }, label);
        }
        let resolved_backward_overflow = {
            let state = self.labels.entry(label).or_insert_with(LabelState::default);
            state.is_resolved()
                && (state.bytecode_offset as i64 - source as i64) < i16::MIN as i64
        };

        if resolved_backward_overflow {
            // The short form cannot reach this far back; emit the standard
            // wide sequence immediately (a reversed condition over goto_w
            // for conditional branches).
            let target_offset = self.labels[&label].bytecode_offset;
            if opcode == GOTO || opcode == JSR {
                let wide_opcode = if opcode == GOTO { GOTO_W } else { JSR_W };
                self.code.put_u8(wide_opcode);
                let delta = target_offset as i64 - source as i64;
                self.code.put_i32(delta as i32);
            } else {
                let reversed = if opcode == IFNULL || opcode == IFNONNULL {
                    opcode ^ 1
                } else {
                    ((opcode - 1) ^ 1) + 1
                };
                // The reversed branch skips the 5 byte goto_w that follows
                // its own 3 bytes.
                self.code.put_u8(reversed).put_i16(8);
                let goto_source = self.code.len() as u32;
                self.code.put_u8(GOTO_W);
                let delta = target_offset as i64 - goto_source as i64;
                self.code.put_i32(delta as i32);
            }
        } else {
            self.code.put_u8(opcode);
            let state = self.labels.entry(label).or_insert_with(LabelState::default);
            state.put(&mut self.code, source, false);
        }

        self.finish_jump_accounting(opcode, label)
    }

    fn visit_label(&mut self, label: Label) -> Result<()> {
        self.require_in_code()?;
        let offset = self.code.len() as u32;
        let rewrote = {
            let state = self.labels.entry(label).or_insert_with(LabelState::default);
            if state.is_resolved() {
                return Err(Error::state("label visited twice"));
            }
            state.resolve(&mut self.code, offset)
        };
        self.has_internal_wide_branches |= rewrote;

        match self.compute {
            Compute::AllFrames => {
                if let Some(current) = self.current_basic_block {
                    let current_offset = self
                        .labels
                        .get(&current)
                        .expect("current block has state")
                        .bytecode_offset;
                    if offset == current_offset {
                        // Several labels at one offset: the first visited is
                        // canonical and owns the shared frame.
                        let jump_target =
                            self.labels.get(&label).unwrap().flags & FLAG_JUMP_TARGET;
                        self.labels
                            .get_mut(&current)
                            .expect("current block has state")
                            .flags |= jump_target;
                        self.labels.get_mut(&label).unwrap().canonical = Some(current);
                        return Ok(());
                    }
                    self.add_successor(0, label);
                }
                self.current_basic_block = Some(label);
                let state = self.labels.get_mut(&label).unwrap();
                if state.frame.is_none() {
                    state.frame = Some(Frame::new());
                }
                self.append_basic_block(label);
            }
            Compute::MaxStackAndLocal => {
                if self.current_basic_block.is_some() {
                    self.seal_current_block();
                    let size = self.relative_stack_size;
                    self.add_successor(size, label);
                }
                self.current_basic_block = Some(label);
                self.relative_stack_size = 0;
                self.max_relative_stack_size = 0;
                self.append_basic_block(label);
            }
            _ => {}
        }
        Ok(())
    }

    fn visit_ldc_insn(&mut self, value: &Constant) -> Result<()> {
        self.require_in_code()?;
        self.last_bytecode_offset = self.code.len() as u32;
        let index = self.symbols.borrow_mut().add_constant(value)?;
        let wide = value.is_wide();
        if wide {
            self.code.put_u8(LDC2_W).put_u16(index);
        } else if index > 255 {
            self.code.put_u8(LDC_W).put_u16(index);
        } else {
            self.code.put_u8(LDC).put_u8(index as u8);
        }
        match self.compute {
            Compute::AllFrames => self.execute_frame(LDC, 0, InsnOperand::Constant(value))?,
            Compute::Nothing => {}
            _ => self.add_stack_delta(if wide { 2 } else { 1 }),
        }
        Ok(())
    }

    fn visit_iinc_insn(&mut self, var: u16, increment: i16) -> Result<()> {
        self.require_in_code()?;
        self.last_bytecode_offset = self.code.len() as u32;
        if var > 255 || increment > 127 || increment < -128 {
            self.code
                .put_u8(WIDE)
                .put_u8(IINC)
                .put_u16(var)
                .put_i16(increment);
        } else {
            self.code
                .put_u8(IINC)
                .put_u8(var as u8)
                .put_i8(increment as i8);
        }
        if self.compute == Compute::AllFrames {
            self.execute_frame(IINC, var as i32, InsnOperand::None)?;
        }
        if self.compute != Compute::Nothing {
            self.update_max_locals(var + 1);
        }
        Ok(())
    }

    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: Label,
        labels: &[Label],
    ) -> Result<()> {
        self.require_in_code()?;
        self.last_bytecode_offset = self.code.len() as u32;
        let source = self.code.len() as u32;
        self.code.put_u8(TABLESWITCH);
        let padding = (4 - (self.code.len() % 4)) % 4;
        self.code.put_zeroes(padding);
        {
            let state = self
                .labels
                .entry(default)
                .or_insert_with(LabelState::default);
            state.put(&mut self.code, source, true);
        }
        self.code.put_i32(min).put_i32(max);
        for &label in labels {
            let state = self.labels.entry(label).or_insert_with(LabelState::default);
            state.put(&mut self.code, source, true);
        }
        self.finish_switch(TABLESWITCH, default, labels)
    }

    fn visit_lookup_switch_insn(
        &mut self,
        default: Label,
        keys: &[i32],
        labels: &[Label],
    ) -> Result<()> {
        self.require_in_code()?;
        if keys.len() != labels.len() {
            return Err(Error::state("lookupswitch keys and labels differ in length"));
        }
        self.last_bytecode_offset = self.code.len() as u32;
        let source = self.code.len() as u32;
        self.code.put_u8(LOOKUPSWITCH);
        let padding = (4 - (self.code.len() % 4)) % 4;
        self.code.put_zeroes(padding);
        {
            let state = self
                .labels
                .entry(default)
                .or_insert_with(LabelState::default);
            state.put(&mut self.code, source, true);
        }
        self.code.put_u32(keys.len() as u32);
        for (key, &label) in keys.iter().zip(labels.iter()) {
            self.code.put_i32(*key);
            let state = self.labels.entry(label).or_insert_with(LabelState::default);
            state.put(&mut self.code, source, true);
        }
        self.finish_switch(LOOKUPSWITCH, default, labels)
    }

    fn visit_multi_a_new_array_insn(&mut self, descriptor: &str, dimensions: u8) -> Result<()> {
        self.require_in_code()?;
        self.last_bytecode_offset = self.code.len() as u32;
        let index = self.symbols.borrow_mut().add_constant_class(descriptor)?;
        self.code
            .put_u8(MULTIANEWARRAY)
            .put_u16(index)
            .put_u8(dimensions);
        match self.compute {
            Compute::AllFrames => self.execute_frame(
                MULTIANEWARRAY,
                dimensions as i32,
                InsnOperand::TypeName(descriptor),
            )?,
            Compute::Nothing => {}
            _ => self.add_stack_delta(1 - dimensions as i32),
        }
        Ok(())
    }

    fn visit_insn_annotation(
        &mut self,
        type_annotation: &TypeAnnotation,
        visible: bool,
    ) -> Result<()> {
        // Fill in the offset of the annotated instruction.
        let mut fixed = type_annotation.clone();
        fixed.type_ref = (fixed.type_ref & 0xFF00_00FF) | (self.last_bytecode_offset << 8);
        self.code_annotations.add_type_annotation(fixed, visible);
        Ok(())
    }

    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<()> {
        self.require_in_code()?;
        let catch_type_index = match catch_type {
            Some(name) => self.symbols.borrow_mut().add_constant_class(name)?,
            None => 0,
        };
        self.handlers.push(Handler {
            start: Bound::At(start),
            end: Bound::At(end),
            handler,
            catch_type_index,
            catch_type: catch_type.map(str::to_owned),
        });
        Ok(())
    }

    fn visit_try_catch_annotation(
        &mut self,
        type_annotation: &TypeAnnotation,
        visible: bool,
    ) -> Result<()> {
        self.code_annotations
            .add_type_annotation(type_annotation.clone(), visible);
        Ok(())
    }

    fn visit_local_variable(
        &mut self,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        start: Label,
        end: Label,
        index: u16,
    ) -> Result<()> {
        self.require_in_code()?;
        let start_offset = self.resolved_offset(start)?;
        let end_offset = self.resolved_offset(end)?;
        {
            let mut table = self.symbols.borrow_mut();
            if let Some(signature) = signature {
                let name_index = table.add_constant_utf8(name)?;
                let signature_index = table.add_constant_utf8(signature)?;
                self.local_variable_types
                    .put_u16(start_offset as u16)
                    .put_u16((end_offset - start_offset) as u16)
                    .put_u16(name_index)
                    .put_u16(signature_index)
                    .put_u16(index);
                self.local_variable_type_count += 1;
            }
            let name_index = table.add_constant_utf8(name)?;
            let descriptor_index = table.add_constant_utf8(descriptor)?;
            self.local_variables
                .put_u16(start_offset as u16)
                .put_u16((end_offset - start_offset) as u16)
                .put_u16(name_index)
                .put_u16(descriptor_index)
                .put_u16(index);
            self.local_variable_count += 1;
        }
        if self.compute != Compute::Nothing {
            let wide_slot = matches!(descriptor.as_bytes().first(), Some(b'J') | Some(b'D'));
            self.update_max_locals(index + 1 + wide_slot as u16);
        }
        Ok(())
    }

    fn visit_local_variable_annotation(
        &mut self,
        type_ref: u32,
        type_path: Option<&TypePath>,
        start: &[Label],
        end: &[Label],
        index: &[u16],
        annotation: &Annotation,
        visible: bool,
    ) -> Result<()> {
        // localvar_target has a table-shaped target_info that a packed
        // reference cannot carry; the entry is serialized right away.
        let mut entry = ByteVector::new();
        entry.put_u8((type_ref >> 24) as u8);
        entry.put_u16(start.len() as u16);
        for ((s, e), idx) in start.iter().zip(end.iter()).zip(index.iter()) {
            let start_offset = self.resolved_offset(*s)?;
            let end_offset = self.resolved_offset(*e)?;
            entry
                .put_u16(start_offset as u16)
                .put_u16((end_offset - start_offset) as u16)
                .put_u16(*idx);
        }
        match type_path {
            Some(path) => path.put(&mut entry),
            None => {
                entry.put_u8(0);
            }
        }
        {
            let mut table = self.symbols.borrow_mut();
            put_annotation(annotation, &mut table, &mut entry)?;
        }
        self.code_annotations
            .add_serialized_type_annotation(entry.into_vec(), visible);
        Ok(())
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<()> {
        self.require_in_code()?;
        let offset = self.resolved_offset(start)?;
        self.labels
            .get_mut(&start)
            .expect("resolved label has state")
            .line_numbers
            .push(line);
        self.line_numbers.put_u16(offset as u16).put_u16(line);
        self.line_number_count += 1;
        Ok(())
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<()> {
        if self.state != State::InCode {
            return Err(Error::state("visit_maxs outside visit_code"));
        }
        self.state = State::PostCode;
        match self.compute {
            Compute::AllFrames => self.compute_all_frames(),
            Compute::MaxStackAndLocal => {
                self.compute_max_stack_and_local();
                Ok(())
            }
            Compute::MaxStackAndLocalFromFrames => {
                self.max_stack = self.max_relative_stack_size.max(0) as u16;
                Ok(())
            }
            Compute::Nothing => {
                self.max_stack = max_stack;
                self.max_locals = max_locals;
                Ok(())
            }
        }
    }

    fn visit_end(&mut self) -> Result<()> {
        if self.state == State::InCode {
            return Err(Error::state("visit_end before visit_maxs"));
        }
        self.state = State::Ended;
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Shared control flow plumbing
// ----------------------------------------------------------------------

impl MethodWriter {
    /// Control flow bookkeeping shared by all emitted jump forms.
    /// `base_opcode` is the logical opcode (goto for goto_w, jsr for jsr_w).
    fn finish_jump_accounting(&mut self, base_opcode: u8, label: Label) -> Result<()> {
        match self.compute {
            Compute::AllFrames => {
                if self.current_basic_block.is_some() {
                    self.execute_frame(base_opcode, 0, InsnOperand::None)?;
                    let target = self.canonical(label);
                    self.labels
                        .entry(target)
                        .or_insert_with(LabelState::default)
                        .flags |= FLAG_JUMP_TARGET;
                    self.add_successor(0, label);
                    if base_opcode != GOTO {
                        // The next instruction starts a new basic block.
                        let next = self.new_label();
                        self.labels
                            .entry(next)
                            .or_insert_with(LabelState::default)
                            .frame = Some(Frame::new());
                        self.visit_label(next)?;
                    }
                }
                if base_opcode == GOTO {
                    self.end_current_basic_block_with_no_successor();
                }
            }
            Compute::MaxStackAndLocal => {
                if self.current_basic_block.is_some() {
                    if base_opcode == JSR {
                        self.has_subroutines = true;
                        if let Some(current) = self.current_basic_block {
                            self.labels
                                .get_mut(&current)
                                .expect("current block has state")
                                .flags |= FLAG_SUBROUTINE_CALLER;
                        }
                        self.labels
                            .entry(label)
                            .or_insert_with(LabelState::default)
                            .flags |= FLAG_SUBROUTINE_START;
                        let size = self.relative_stack_size;
                        self.add_successor(size + 1, label);
                        // The continuation starts at the next instruction;
                        // visiting its label adds the continuation edge,
                        // always the caller block's second one.
                        let next = self.new_label();
                        self.visit_label(next)?;
                    } else {
                        self.add_stack_delta(STACK_SIZE_DELTA[base_opcode as usize] as i32);
                        let size = self.relative_stack_size;
                        self.add_successor(size, label);
                    }
                }
                if base_opcode == GOTO {
                    self.end_current_basic_block_with_no_successor();
                }
            }
            Compute::MaxStackAndLocalFromFrames => {
                self.add_stack_delta(STACK_SIZE_DELTA[base_opcode as usize] as i32);
            }
            Compute::Nothing => {}
        }
        Ok(())
    }

    fn resolved_offset(&self, label: Label) -> Result<u32> {
        self.labels
            .get(&label)
            .filter(|state| state.is_resolved())
            .map(|state| state.bytecode_offset)
            .ok_or_else(|| Error::state("label referenced before being visited"))
    }

    fn finish_switch(&mut self, opcode: u8, default: Label, labels: &[Label]) -> Result<()> {
        match self.compute {
            Compute::AllFrames => {
                if self.current_basic_block.is_some() {
                    self.execute_frame(opcode, 0, InsnOperand::None)?;
                    let targets: Vec<Label> = std::iter::once(default)
                        .chain(labels.iter().copied())
                        .collect();
                    for target in targets {
                        let canonical = self.canonical(target);
                        self.labels
                            .entry(canonical)
                            .or_insert_with(LabelState::default)
                            .flags |= FLAG_JUMP_TARGET;
                        self.add_successor(0, target);
                    }
                }
                self.end_current_basic_block_with_no_successor();
            }
            Compute::MaxStackAndLocal => {
                if self.current_basic_block.is_some() {
                    self.add_stack_delta(-1);
                    let size = self.relative_stack_size;
                    self.add_successor(size, default);
                    for &label in labels {
                        self.add_successor(size, label);
                    }
                }
                self.end_current_basic_block_with_no_successor();
            }
            Compute::MaxStackAndLocalFromFrames => self.add_stack_delta(-1),
            Compute::Nothing => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Max stack/locals via the control flow graph (COMPUTE_MAXS)
    // ------------------------------------------------------------------

    fn compute_max_stack_and_local(&mut self) {
        self.seal_current_block();

        // Subroutine completion first, so a caller block's first two edges
        // are still the jsr target and the continuation.
        if self.has_subroutines {
            let mut num_subroutines = 1u16;
            if let Some(first) = self.first_basic_block {
                self.mark_subroutine(first, num_subroutines);
            }
            let mut block = self.first_basic_block;
            while let Some(label) = block {
                let (is_caller, target, next) = {
                    let state = &self.labels[&label];
                    (
                        state.flags & FLAG_SUBROUTINE_CALLER != 0,
                        state.outgoing_edges.first().map(|edge| edge.successor),
                        state.next_basic_block,
                    )
                };
                if is_caller {
                    if let Some(target) = target {
                        if self.labels[&target].subroutine_id == 0 {
                            num_subroutines += 1;
                            self.mark_subroutine(target, num_subroutines);
                        }
                    }
                }
                block = next;
            }
            let mut block = self.first_basic_block;
            while let Some(label) = block {
                let (is_caller, target, continuation, next) = {
                    let state = &self.labels[&label];
                    (
                        state.flags & FLAG_SUBROUTINE_CALLER != 0,
                        state.outgoing_edges.first().map(|e| e.successor),
                        state.outgoing_edges.get(1).map(|e| e.successor),
                        state.next_basic_block,
                    )
                };
                if is_caller {
                    if let (Some(target), Some(continuation)) = (target, continuation) {
                        self.add_subroutine_ret_successors(target, continuation);
                    }
                }
                block = next;
            }
        }

        // Exception edges: every block inside a protected range can transfer
        // to the handler with a one-element stack.
        let handlers = self.handlers.clone();
        for handler in &handlers {
            let start = self.bound_offset(handler.start);
            let end = self.bound_offset(handler.end);
            let mut block = self.first_basic_block;
            while let Some(label) = block {
                let (offset, next) = {
                    let state = &self.labels[&label];
                    (state.bytecode_offset, state.next_basic_block)
                };
                if offset >= start && offset < end {
                    self.labels
                        .get_mut(&label)
                        .expect("chained block has state")
                        .outgoing_edges
                        .push(Edge {
                            info: EDGE_EXCEPTION,
                            successor: handler.handler,
                        });
                }
                block = next;
            }
        }

        // Data flow: each block is processed once; its absolute input stack
        // size plus its relative maximum bounds max_stack.
        let mut max_stack_size = 0i32;
        let mut list_head = EMPTY_LIST;
        if let Some(first) = self.first_basic_block {
            self.labels
                .get_mut(&first)
                .expect("first block has state")
                .next_list_element = Some(EMPTY_LIST);
            list_head = first;
        }
        while list_head != EMPTY_LIST {
            let block = list_head;
            let (next, input, output_max, edges) = {
                let state = self.labels.get_mut(&block).unwrap();
                let next = state.next_list_element.take().expect("block was enqueued");
                (
                    next,
                    state.input_stack_size as i32,
                    state.output_stack_max as i32,
                    state.outgoing_edges.clone(),
                )
            };
            list_head = next;
            max_stack_size = max_stack_size.max(input + output_max);
            for edge in edges {
                let state = self
                    .labels
                    .entry(edge.successor)
                    .or_insert_with(LabelState::default);
                if state.next_list_element.is_none() {
                    state.input_stack_size = if edge.info == EDGE_EXCEPTION {
                        1
                    } else {
                        (input + edge.info).max(0) as u16
                    };
                    state.next_list_element = Some(list_head);
                    list_head = edge.successor;
                }
            }
        }
        self.max_stack = max_stack_size.max(0) as u16;
    }

    /// Flood-fills `subroutine_id` over every block reachable from `start`
    /// without crossing into other subroutines through jsr target edges.
    fn mark_subroutine(&mut self, start: Label, subroutine_id: u16) {
        let mut list_head = start;
        self.labels
            .entry(start)
            .or_insert_with(LabelState::default)
            .next_list_element = Some(EMPTY_LIST);
        while list_head != EMPTY_LIST {
            let block = list_head;
            let next = {
                let state = self.labels.get_mut(&block).unwrap();
                state.next_list_element.take().expect("block was enqueued")
            };
            list_head = next;
            if self.labels[&block].subroutine_id == 0 {
                self.labels.get_mut(&block).unwrap().subroutine_id = subroutine_id;
                list_head = self.push_successors(block, list_head);
            }
        }
    }

    /// Pushes the unlisted successors of `block` onto the work list,
    /// skipping the jsr target edge of subroutine callers (their first edge
    /// by construction).
    fn push_successors(&mut self, block: Label, mut list_head: Label) -> Label {
        let (is_caller, edges) = {
            let state = &self.labels[&block];
            (
                state.flags & FLAG_SUBROUTINE_CALLER != 0,
                state.outgoing_edges.clone(),
            )
        };
        for (index, edge) in edges.iter().enumerate() {
            if is_caller && index == 0 {
                continue;
            }
            let state = self
                .labels
                .entry(edge.successor)
                .or_insert_with(LabelState::default);
            if state.next_list_element.is_none() {
                state.next_list_element = Some(list_head);
                list_head = edge.successor;
            }
        }
        list_head
    }

    /// Walks the subroutine starting at `start` and adds an edge from every
    /// block flagged as a subroutine end to `continuation`, the instruction
    /// following the caller's jsr.
    fn add_subroutine_ret_successors(&mut self, start: Label, continuation: Label) {
        let subroutine_id = self.labels[&start].subroutine_id;
        let mut processed: Vec<Label> = Vec::new();
        let mut list_head = start;
        self.labels
            .get_mut(&start)
            .expect("subroutine start has state")
            .next_list_element = Some(EMPTY_LIST);
        while list_head != EMPTY_LIST {
            let block = list_head;
            let next = {
                let state = self.labels.get_mut(&block).unwrap();
                state.next_list_element.take().expect("block was enqueued")
            };
            list_head = next;
            processed.push(block);
            let is_end = {
                let state = &self.labels[&block];
                state.flags & FLAG_SUBROUTINE_END != 0 && state.subroutine_id == subroutine_id
            };
            if is_end {
                let output_stack_size = self.labels[&block].output_stack_size as i32;
                self.labels
                    .get_mut(&block)
                    .unwrap()
                    .outgoing_edges
                    .push(Edge {
                        info: output_stack_size,
                        successor: continuation,
                    });
            }
            list_head = self.push_successors(block, list_head);
        }
        // Restore the "in no list" invariant before returning.
        for label in processed {
            self.labels.get_mut(&label).unwrap().next_list_element = None;
        }
    }

    fn bound_offset(&self, bound: Bound) -> u32 {
        match bound {
            Bound::Offset(offset) => offset,
            Bound::At(label) => self
                .labels
                .get(&label)
                .map(|state| state.bytecode_offset)
                .unwrap_or(0),
        }
    }

    // ------------------------------------------------------------------
    // Full frame computation (COMPUTE_FRAMES)
    // ------------------------------------------------------------------

    fn compute_all_frames(&mut self) -> Result<()> {
        // Exception edges carry the caught type as a packed abstract type.
        let handlers = self.handlers.clone();
        for handler in &handlers {
            let catch_name = handler.catch_type.as_deref().unwrap_or("java/lang/Throwable");
            let catch_ty = {
                let mut table = self.symbols.borrow_mut();
                type_from_internal_name(&mut table, catch_name)
            };
            let handler_block = self.canonical(handler.handler);
            self.labels
                .entry(handler_block)
                .or_insert_with(LabelState::default)
                .flags |= FLAG_JUMP_TARGET;
            let start = self.bound_offset(handler.start);
            let end = self.bound_offset(handler.end);
            let mut block = self.first_basic_block;
            while let Some(label) = block {
                let (offset, next) = {
                    let state = &self.labels[&label];
                    (state.bytecode_offset, state.next_basic_block)
                };
                if offset >= start && offset < end {
                    self.labels
                        .get_mut(&label)
                        .expect("chained block has state")
                        .outgoing_edges
                        .push(Edge {
                            info: catch_ty.0 as i32,
                            successor: handler_block,
                        });
                }
                block = next;
            }
        }

        // Implicit first frame from the method's access flags and
        // descriptor; max_locals is final at this point.
        let first = match self.first_basic_block {
            Some(first) => first,
            None => return Ok(()),
        };
        {
            let mut table = self.symbols.borrow_mut();
            let is_constructor = self.name == "<init>";
            let access = self.access;
            let descriptor = self.descriptor.clone();
            let max_locals = self.max_locals as usize;
            let state = self.labels.get_mut(&first).unwrap();
            state
                .frame
                .as_mut()
                .expect("first block has a frame")
                .set_input_frame_from_descriptor(
                    &mut table,
                    access,
                    is_constructor,
                    &descriptor,
                    max_locals,
                )?;
        }

        // Fixpoint over the block graph.
        let mut max_stack = 0usize;
        let mut list_head = first;
        self.labels.get_mut(&first).unwrap().next_list_element = Some(EMPTY_LIST);
        while list_head != EMPTY_LIST {
            let block = list_head;
            let (next, output_locals, output_stack, handler_locals, edges) = {
                let mut table = self.symbols.borrow_mut();
                let state = self.labels.get_mut(&block).unwrap();
                let next = state.next_list_element.take().expect("block was enqueued");
                state.flags |= FLAG_REACHABLE;
                let frame = state.frame.as_ref().expect("reachable block has a frame");
                let (locals, stack) = frame.concrete_output_frame(&mut table);
                let handler_locals = frame.initialized_input_locals(&mut table);
                let input_len = frame
                    .input_stack
                    .as_ref()
                    .map(|stack| stack.len())
                    .unwrap_or(0);
                max_stack = max_stack.max(input_len + frame.output_stack_max as usize);
                (next, locals, stack, handler_locals, state.outgoing_edges.clone())
            };
            list_head = next;

            for edge in edges {
                let successor = self.canonical(edge.successor);
                let changed = {
                    let mut table = self.symbols.borrow_mut();
                    let state = self
                        .labels
                        .entry(successor)
                        .or_insert_with(LabelState::default);
                    let frame = state.frame.get_or_insert_with(Frame::new);
                    if edge.info != 0 {
                        frame.merge_input(
                            &mut table,
                            &handler_locals,
                            &[],
                            Some(Ty(edge.info as u32)),
                        )?
                    } else {
                        frame.merge_input(&mut table, &output_locals, &output_stack, None)?
                    }
                };
                if changed {
                    let state = self.labels.get_mut(&successor).unwrap();
                    if state.next_list_element.is_none() {
                        state.next_list_element = Some(list_head);
                        list_head = successor;
                    }
                }
            }
        }

        // Replace unreachable code by nop ... nop athrow, give it a minimal
        // valid frame, and excise it from every exception range.
        let mut block = Some(first);
        while let Some(label) = block {
            let (next, reachable, offset) = {
                let state = &self.labels[&label];
                (
                    state.next_basic_block,
                    state.flags & FLAG_REACHABLE != 0,
                    state.bytecode_offset,
                )
            };
            if !reachable {
                let end = match next {
                    Some(next_label) => self.labels[&next_label].bytecode_offset,
                    None => self.code.len() as u32,
                };
                if end > offset {
                    for patch in offset..end - 1 {
                        self.code.set_u8(patch as usize, NOP);
                    }
                    self.code.set_u8(end as usize - 1, ATHROW);
                    let throwable = {
                        let mut table = self.symbols.borrow_mut();
                        type_from_internal_name(&mut table, "java/lang/Throwable")
                    };
                    let max_locals = self.max_locals as usize;
                    let state = self.labels.get_mut(&label).unwrap();
                    let frame = state.frame.get_or_insert_with(Frame::new);
                    frame.input_locals = Some(vec![Ty::TOP; max_locals]);
                    frame.input_stack = Some(vec![throwable]);
                    state.flags |= FLAG_REACHABLE | FLAG_JUMP_TARGET;
                    max_stack = max_stack.max(1);
                    self.remove_handler_range(offset, end);
                }
            }
            block = next;
        }

        // Emit the stack map, one frame per jump target block, compressed
        // against the previous one.
        let use_table = self.symbols.borrow().major_version() >= V1_6.major();
        {
            let baseline = {
                let frame = self.labels[&first].frame.as_ref().unwrap();
                collapse_and_trim(frame.input_locals.as_ref().unwrap())
            };
            self.emitted_frame_locals = baseline;
            self.previous_frame_offset = -1;
        }
        let mut block = Some(first);
        while let Some(label) = block {
            let (next, needs_frame, offset) = {
                let state = &self.labels[&label];
                (
                    state.next_basic_block,
                    state.flags & FLAG_JUMP_TARGET != 0
                        && state.flags & FLAG_REACHABLE != 0
                        && state
                            .frame
                            .as_ref()
                            .map_or(false, |frame| frame.input_locals.is_some()),
                    state.bytecode_offset,
                )
            };
            if needs_frame {
                let (locals, stack) = {
                    let frame = self.labels[&label].frame.as_ref().unwrap();
                    (
                        collapse_and_trim(frame.input_locals.as_ref().unwrap()),
                        collapsed(frame.input_stack.as_ref().unwrap()).collect::<Vec<Ty>>(),
                    )
                };
                self.put_frame_entry(offset, &locals, &stack, use_table)?;
            }
            block = next;
        }

        self.max_stack = max_stack as u16;
        Ok(())
    }

    /// Removes `[start, end)` from every exception range, splitting entries
    /// that span it.
    fn remove_handler_range(&mut self, start: u32, end: u32) {
        let old = std::mem::take(&mut self.handlers);
        for handler in old {
            let handler_start = self.bound_offset(handler.start);
            let handler_end = self.bound_offset(handler.end);
            if end <= handler_start || start >= handler_end {
                self.handlers.push(handler);
                continue;
            }
            if handler_start < start {
                let mut piece = handler.clone();
                piece.end = Bound::Offset(start);
                self.handlers.push(piece);
            }
            if end < handler_end {
                let mut piece = handler;
                piece.start = Bound::Offset(end);
                self.handlers.push(piece);
            }
        }
    }

    // ------------------------------------------------------------------
    // Stack map serialization
    // ------------------------------------------------------------------

    fn init_implicit_frame_locals(&mut self) -> Result<()> {
        let mut table = self.symbols.borrow_mut();
        let mut locals = Vec::new();
        if !self.access.contains(AccessFlags::STATIC) {
            if self.name == "<init>" {
                locals.push(Ty::UNINITIALIZED_THIS);
            } else {
                let class_name = table.class_name().to_owned();
                locals.push(type_from_internal_name(&mut table, &class_name));
            }
        }
        for argument in argument_types(&self.descriptor)? {
            locals.push(type_from_descriptor(&mut table, &argument.to_string()));
        }
        drop(table);
        self.emitted_frame_locals = locals;
        Ok(())
    }

    fn pack_frame_items(&mut self, items: &[FrameItem]) -> Result<Vec<Ty>> {
        let mut table = self.symbols.borrow_mut();
        let mut packed = Vec::with_capacity(items.len());
        for item in items {
            let ty = match item {
                FrameItem::Top => Ty::TOP,
                FrameItem::Integer => Ty::INTEGER,
                FrameItem::Float => Ty::FLOAT,
                FrameItem::Double => Ty::DOUBLE,
                FrameItem::Long => Ty::LONG,
                FrameItem::Null => Ty::NULL,
                FrameItem::UninitializedThis => Ty::UNINITIALIZED_THIS,
                FrameItem::Object(name) => type_from_internal_name(&mut table, name),
                FrameItem::Uninitialized(label) => {
                    let offset = self
                        .labels
                        .get(label)
                        .filter(|state| state.is_resolved())
                        .map(|state| state.bytecode_offset)
                        .ok_or_else(|| {
                            Error::state("uninitialized frame item label not resolved")
                        })?;
                    Ty::uninitialized(table.add_uninitialized_type("", offset))
                }
            };
            packed.push(ty);
        }
        Ok(packed)
    }

    fn frame_offset_delta(&self, offset: u32) -> u16 {
        (offset as i32 - (self.previous_frame_offset + 1)) as u16
    }

    fn finish_frame_entry(&mut self, offset: u32, locals: Vec<Ty>) {
        self.previous_frame_offset = offset as i32;
        self.emitted_frame_locals = locals;
        self.stack_map_count += 1;
    }

    fn put_frame_types(&mut self, types: &[Ty], with_count: bool) -> Result<()> {
        let mut table = self.symbols.borrow_mut();
        if with_count {
            self.stack_map_entries.put_u16(types.len() as u16);
        }
        for &ty in types {
            put_verification_type(&mut table, ty, &mut self.stack_map_entries)?;
        }
        Ok(())
    }

    /// Writes one frame in the tightest delta encoding that fits, updating
    /// the previous-frame baseline.
    fn put_frame_entry(
        &mut self,
        offset: u32,
        locals: &[Ty],
        stack: &[Ty],
        use_table: bool,
    ) -> Result<()> {
        if !use_table {
            return self.put_uncompressed_frame(offset, locals, stack);
        }
        let previous = self.emitted_frame_locals.clone();
        let delta = self.frame_offset_delta(offset);
        let grown = locals.len() as i32 - previous.len() as i32;
        let shared = previous.len().min(locals.len());
        let prefix_equal = locals[..shared] == previous[..shared];

        if stack.is_empty() && grown == 0 && prefix_equal {
            if delta < 64 {
                self.stack_map_entries.put_u8(delta as u8);
            } else {
                self.stack_map_entries.put_u8(251).put_u16(delta);
            }
        } else if stack.is_empty() && (-3..0).contains(&grown) && prefix_equal {
            self.stack_map_entries
                .put_u8((251 + grown) as u8)
                .put_u16(delta);
        } else if stack.is_empty() && (1..=3).contains(&grown) && prefix_equal {
            self.stack_map_entries
                .put_u8((251 + grown) as u8)
                .put_u16(delta);
            self.put_frame_types(&locals[previous.len()..], false)?;
        } else if stack.len() == 1 && grown == 0 && prefix_equal {
            if delta < 64 {
                self.stack_map_entries.put_u8(64 + delta as u8);
            } else {
                self.stack_map_entries.put_u8(247).put_u16(delta);
            }
            self.put_frame_types(stack, false)?;
        } else {
            self.stack_map_entries.put_u8(255).put_u16(delta);
            self.put_frame_types(locals, true)?;
            self.put_frame_types(stack, true)?;
        }
        self.finish_frame_entry(offset, locals.to_vec());
        Ok(())
    }

    /// Pre-1.6 `StackMap` attribute entry: absolute offset, full locals and
    /// stack, no compression.
    fn put_uncompressed_frame(&mut self, offset: u32, locals: &[Ty], stack: &[Ty]) -> Result<()> {
        self.stack_map_entries.put_u16(offset as u16);
        self.put_frame_types(locals, true)?;
        self.put_frame_types(stack, true)?;
        self.finish_frame_entry(offset, locals.to_vec());
        Ok(())
    }

    /// Re-anchors the linear stack/local tracking at a visited frame
    /// (frame-anchored maxs mode). Every expanded or full frame gives an
    /// absolute stack height; delta frames imply an empty (or one element)
    /// stack.
    fn anchor_sizes_at_frame(
        &mut self,
        kind: FrameKind,
        n_local: u16,
        locals: &[FrameItem],
        stack: &[FrameItem],
    ) {
        if self.frame_local_sizes.is_empty() {
            self.frame_local_sizes = implicit_local_sizes(self.access, &self.descriptor);
        }
        match kind {
            FrameKind::New | FrameKind::Full => {
                self.frame_local_sizes = locals.iter().map(item_slots).collect();
            }
            FrameKind::Append => {
                self.frame_local_sizes.extend(locals.iter().map(item_slots));
            }
            FrameKind::Chop => {
                for _ in 0..n_local {
                    self.frame_local_sizes.pop();
                }
            }
            FrameKind::Same | FrameKind::Same1 => {}
        }
        let stack_slots: u32 = stack.iter().map(|item| item_slots(item) as u32).sum();
        self.relative_stack_size = stack_slots as i32;
        if self.relative_stack_size > self.max_relative_stack_size {
            self.max_relative_stack_size = self.relative_stack_size;
        }
        let local_slots: u32 = self.frame_local_sizes.iter().map(|s| *s as u32).sum();
        self.update_max_locals(local_slots.min(u16::MAX as u32) as u16);
    }

    // ------------------------------------------------------------------
    // method_info assembly
    // ------------------------------------------------------------------

    pub(crate) fn put(&self, out: &mut ByteVector) -> Result<()> {
        if let Some((offset, length)) = self.source_copy {
            let source = self
                .symbols
                .borrow()
                .source_bytes()
                .expect("verbatim copy requires a source class")
                .clone();
            out.put_bytes(&source[offset..offset + length]);
            return Ok(());
        }

        let mut table = self.symbols.borrow_mut();
        let use_synthetic_attribute = table.major_version() < V1_5.major();
        let use_stack_map_table = table.major_version() >= V1_6.major();

        out.put_u16(self.access.file_bits());
        out.put_u16(self.name_index);
        out.put_u16(self.descriptor_index);

        let mut attribute_count = self.annotations.attribute_count();
        if self.has_code {
            attribute_count += 1;
        }
        if !self.exception_indexes.is_empty() {
            attribute_count += 1;
        }
        if self.signature_index != 0 {
            attribute_count += 1;
        }
        if self.access.contains(AccessFlags::SYNTHETIC) && use_synthetic_attribute {
            attribute_count += 1;
        }
        if self.access.contains(AccessFlags::DEPRECATED) {
            attribute_count += 1;
        }
        if self.parameters_count > 0 {
            attribute_count += 1;
        }
        if self.annotation_default.is_some() {
            attribute_count += 1;
        }
        if !self.parameter_annotations_visible.is_empty() {
            attribute_count += 1;
        }
        if !self.parameter_annotations_invisible.is_empty() {
            attribute_count += 1;
        }
        attribute_count += self.attributes.len() as u16;
        out.put_u16(attribute_count);

        if self.has_code {
            if self.code.len() > u16::MAX as usize {
                return Err(Error::MethodTooLarge {
                    class: table.class_name().to_owned(),
                    method: self.name.clone(),
                    descriptor: self.descriptor.clone(),
                    code_length: self.code.len(),
                });
            }
            let mut body = ByteVector::with_capacity(self.code.len() + 64);
            body.put_u16(self.max_stack).put_u16(self.max_locals);
            body.put_u32(self.code.len() as u32);
            body.put_bytes(self.code.as_slice());
            body.put_u16(self.handlers.len() as u16);
            for handler in &self.handlers {
                body.put_u16(self.bound_offset(handler.start) as u16)
                    .put_u16(self.bound_offset(handler.end) as u16)
                    .put_u16(self.bound_offset(Bound::At(handler.handler)) as u16)
                    .put_u16(handler.catch_type_index);
            }

            let mut code_attribute_count = 0u16;
            if self.line_number_count > 0 {
                code_attribute_count += 1;
            }
            if self.local_variable_count > 0 {
                code_attribute_count += 1;
            }
            if self.local_variable_type_count > 0 {
                code_attribute_count += 1;
            }
            if self.stack_map_count > 0 {
                code_attribute_count += 1;
            }
            code_attribute_count += self.code_annotations.attribute_count();
            body.put_u16(code_attribute_count);

            if self.line_number_count > 0 {
                body.put_u16(table.add_constant_utf8("LineNumberTable")?);
                body.put_u32(2 + self.line_numbers.len() as u32);
                body.put_u16(self.line_number_count);
                body.put_bytes(self.line_numbers.as_slice());
            }
            if self.local_variable_count > 0 {
                body.put_u16(table.add_constant_utf8("LocalVariableTable")?);
                body.put_u32(2 + self.local_variables.len() as u32);
                body.put_u16(self.local_variable_count);
                body.put_bytes(self.local_variables.as_slice());
            }
            if self.local_variable_type_count > 0 {
                body.put_u16(table.add_constant_utf8("LocalVariableTypeTable")?);
                body.put_u32(2 + self.local_variable_types.len() as u32);
                body.put_u16(self.local_variable_type_count);
                body.put_bytes(self.local_variable_types.as_slice());
            }
            if self.stack_map_count > 0 {
                let attribute_name = if use_stack_map_table {
                    "StackMapTable"
                } else {
                    "StackMap"
                };
                body.put_u16(table.add_constant_utf8(attribute_name)?);
                body.put_u32(2 + self.stack_map_entries.len() as u32);
                body.put_u16(self.stack_map_count);
                body.put_bytes(self.stack_map_entries.as_slice());
            }
            self.code_annotations.put(&mut table, &mut body)?;

            out.put_u16(table.add_constant_utf8("Code")?);
            out.put_u32(body.len() as u32);
            out.put_bytes(body.as_slice());
        }

        if !self.exception_indexes.is_empty() {
            out.put_u16(table.add_constant_utf8("Exceptions")?);
            out.put_u32(2 + 2 * self.exception_indexes.len() as u32);
            out.put_u16(self.exception_indexes.len() as u16);
            for index in &self.exception_indexes {
                out.put_u16(*index);
            }
        }
        if self.signature_index != 0 {
            out.put_u16(table.add_constant_utf8("Signature")?);
            out.put_u32(2);
            out.put_u16(self.signature_index);
        }
        if self.access.contains(AccessFlags::SYNTHETIC) && use_synthetic_attribute {
            out.put_u16(table.add_constant_utf8("Synthetic")?);
            out.put_u32(0);
        }
        if self.access.contains(AccessFlags::DEPRECATED) {
            out.put_u16(table.add_constant_utf8("Deprecated")?);
            out.put_u32(0);
        }
        if self.parameters_count > 0 {
            out.put_u16(table.add_constant_utf8("MethodParameters")?);
            out.put_u32(1 + self.parameters.len() as u32);
            out.put_u8(self.parameters_count);
            out.put_bytes(self.parameters.as_slice());
        }
        if let Some(default) = &self.annotation_default {
            out.put_u16(table.add_constant_utf8("AnnotationDefault")?);
            let mut body = ByteVector::new();
            put_element_value(default, &mut table, &mut body)?;
            out.put_u32(body.len() as u32);
            out.put_bytes(body.as_slice());
        }
        if !self.parameter_annotations_visible.is_empty() {
            self.put_parameter_annotations(
                &mut table,
                out,
                "RuntimeVisibleParameterAnnotations",
                &self.parameter_annotations_visible,
                self.annotable_count_visible,
            )?;
        }
        if !self.parameter_annotations_invisible.is_empty() {
            self.put_parameter_annotations(
                &mut table,
                out,
                "RuntimeInvisibleParameterAnnotations",
                &self.parameter_annotations_invisible,
                self.annotable_count_invisible,
            )?;
        }
        self.annotations.put(&mut table, out)?;
        crate::attribute::put_attributes(&self.attributes, &mut table, out)?;
        Ok(())
    }

    fn put_parameter_annotations(
        &self,
        table: &mut SymbolTable,
        out: &mut ByteVector,
        attribute_name: &str,
        annotations: &[Vec<Annotation>],
        annotable_count: u16,
    ) -> Result<()> {
        let num_parameters = if annotable_count > 0 {
            annotable_count as usize
        } else {
            argument_types(&self.descriptor)?.len()
        };
        let name_index = table.add_constant_utf8(attribute_name)?;
        let mut body = ByteVector::new();
        body.put_u8(num_parameters as u8);
        for parameter in 0..num_parameters {
            match annotations.get(parameter) {
                Some(list) => {
                    body.put_u16(list.len() as u16);
                    for annotation in list {
                        put_annotation(annotation, table, &mut body)?;
                    }
                }
                None => {
                    body.put_u16(0);
                }
            }
        }
        out.put_u16(name_index);
        out.put_u32(body.len() as u32);
        out.put_bytes(body.as_slice());
        Ok(())
    }
}

/// Collapses wide-type TOP shadows and trims trailing TOP locals, producing
/// the form frames are emitted in.
fn collapse_and_trim(types: &[Ty]) -> Vec<Ty> {
    let mut result: Vec<Ty> = collapsed(types).collect();
    while result.last() == Some(&Ty::TOP) {
        result.pop();
    }
    result
}

fn item_slots(item: &FrameItem) -> u8 {
    match item {
        FrameItem::Long | FrameItem::Double => 2,
        _ => 1,
    }
}

/// Slot widths of the implicit first frame's locals (receiver plus
/// arguments).
fn implicit_local_sizes(access: AccessFlags, descriptor: &str) -> Vec<u8> {
    let mut sizes = Vec::new();
    if !access.contains(AccessFlags::STATIC) {
        sizes.push(1);
    }
    if let Ok(arguments) = argument_types(descriptor) {
        for argument in arguments {
            sizes.push(argument.slots() as u8);
        }
    }
    sizes
}

#[cfg(test)]
mod test {
    use super::*;

    fn writer(descriptor: &str, compute: Compute) -> MethodWriter {
        let symbols = Rc::new(RefCell::new(SymbolTable::new()));
        symbols.borrow_mut().set_class_info("test/Example", 52);
        MethodWriter::new(
            symbols,
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            "m",
            descriptor,
            None,
            &[],
            compute,
        )
        .unwrap()
    }

    #[test]
    fn empty_method_has_zero_maxs() {
        let mut mw = writer("()V", Compute::MaxStackAndLocal);
        mw.visit_code().unwrap();
        mw.visit_insn(RETURN).unwrap();
        mw.visit_maxs(0, 0).unwrap();
        mw.visit_end().unwrap();
        assert_eq!(mw.max_stack(), 0);
        assert_eq!(mw.max_locals(), 0);
        assert_eq!(mw.code_bytes(), &[RETURN]);
    }

    #[test]
    fn forward_short_jump_is_patched() {
        let mut mw = writer("()I", Compute::MaxStackAndLocal);
        mw.visit_code().unwrap();
        let target = mw.new_label();
        mw.visit_insn(ICONST_0).unwrap();
        mw.visit_jump_insn(IFNE, target).unwrap();
        mw.visit_insn(ICONST_1).unwrap();
        mw.visit_insn(POP).unwrap();
        mw.visit_label(target).unwrap();
        mw.visit_insn(ICONST_1).unwrap();
        mw.visit_insn(IRETURN).unwrap();
        mw.visit_maxs(0, 0).unwrap();
        mw.visit_end().unwrap();
        // iconst_0 at 0, ifne at 1 (offset bytes at 2..4), target at 6.
        assert_eq!(mw.code.get_u16(2), 5);
        assert_eq!(mw.max_stack(), 1);
        assert_eq!(mw.max_locals(), 0);
    }

    #[test]
    fn oversized_forward_jump_switches_to_internal_opcode() {
        let mut mw = writer("()V", Compute::MaxStackAndLocal);
        mw.visit_code().unwrap();
        let target = mw.new_label();
        mw.visit_insn(ICONST_0).unwrap();
        mw.visit_jump_insn(IFNE, target).unwrap();
        for _ in 0..40_000 {
            mw.visit_insn(NOP).unwrap();
        }
        mw.visit_label(target).unwrap();
        mw.visit_insn(RETURN).unwrap();
        mw.visit_maxs(0, 0).unwrap();
        mw.visit_end().unwrap();
        assert!(mw.has_internal_wide_branches());
        assert_eq!(mw.code.get_u8(1), IFNE + WIDE_JUMP_DELTA);
    }

    #[test]
    fn oversized_backward_jump_emits_goto_w_immediately() {
        let mut mw = writer("()V", Compute::MaxStackAndLocal);
        mw.visit_code().unwrap();
        let top = mw.new_label();
        mw.visit_label(top).unwrap();
        for _ in 0..40_000 {
            mw.visit_insn(NOP).unwrap();
        }
        mw.visit_insn(ICONST_0).unwrap();
        mw.visit_jump_insn(IFEQ, top).unwrap();
        mw.visit_insn(RETURN).unwrap();
        mw.visit_maxs(0, 0).unwrap();
        mw.visit_end().unwrap();
        assert!(!mw.has_internal_wide_branches());
        // Reversed condition (ifne +8) followed by goto_w back to the top.
        assert_eq!(mw.code.get_u8(40_001), IFNE);
        assert_eq!(mw.code.get_u8(40_004), GOTO_W);
    }

    #[test]
    fn subroutine_blocks_gain_ret_edges() {
        let mut mw = writer("()V", Compute::MaxStackAndLocal);
        mw.visit_code().unwrap();
        let sub = mw.new_label();
        mw.visit_jump_insn(JSR, sub).unwrap();
        mw.visit_insn(RETURN).unwrap();
        mw.visit_label(sub).unwrap();
        mw.visit_var_insn(ASTORE, 1).unwrap();
        mw.visit_var_insn(RET, 1).unwrap();
        mw.visit_maxs(0, 0).unwrap();
        mw.visit_end().unwrap();
        let sub_state = &mw.labels[&sub];
        assert!(sub_state.flags & FLAG_SUBROUTINE_END != 0);
        // The subroutine end block has an edge back to the caller's
        // continuation.
        assert!(!sub_state.outgoing_edges.is_empty());
        assert_eq!(mw.max_stack(), 1);
        assert_eq!(mw.max_locals(), 2);
        // Work lists were drained cleanly.
        assert!(mw.labels.values().all(|s| s.next_list_element.is_none()
            || s.next_list_element == Some(EMPTY_LIST)));
    }

    #[test]
    fn jsr_is_rejected_lazily_under_frames() {
        let mut mw = writer("()V", Compute::AllFrames);
        mw.visit_code().unwrap();
        let sub = mw.new_label();
        match mw.visit_jump_insn(JSR, sub) {
            Err(Error::Unsupported { .. }) => {}
            other => panic!("expected Unsupported, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn frame_fixpoint_emits_merge_frame() {
        // static m(I)I: iload_0; ifeq L; iconst_1; goto E; L: iconst_2; E: ireturn
        let mut mw = writer("(I)I", Compute::AllFrames);
        mw.visit_code().unwrap();
        let l = mw.new_label();
        let e = mw.new_label();
        mw.visit_var_insn(ILOAD, 0).unwrap();
        mw.visit_jump_insn(IFEQ, l).unwrap();
        mw.visit_insn(ICONST_1).unwrap();
        mw.visit_jump_insn(GOTO, e).unwrap();
        mw.visit_label(l).unwrap();
        mw.visit_insn(ICONST_2).unwrap();
        mw.visit_label(e).unwrap();
        mw.visit_insn(IRETURN).unwrap();
        mw.visit_maxs(0, 0).unwrap();
        mw.visit_end().unwrap();
        assert_eq!(mw.max_stack(), 1);
        assert_eq!(mw.max_locals(), 1);
        // Frames at L (same, empty stack) and E (same_locals_1_stack with an
        // int). L is at offset 8, E at offset 9.
        assert_eq!(mw.stack_map_count, 2);
        let entries = mw.stack_map_entries.as_slice();
        // L: same_frame, delta 8.
        assert_eq!(entries[0], 8);
        // E: same_locals_1_stack_item, delta 0, stack [INTEGER].
        assert_eq!(entries[1], 64);
        assert_eq!(entries[2], 1);
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn unreachable_code_is_replaced_by_athrow() {
        let mut mw = writer("()V", Compute::AllFrames);
        mw.visit_code().unwrap();
        let end = mw.new_label();
        mw.visit_jump_insn(GOTO, end).unwrap();
        // Dead code after the goto.
        mw.visit_insn(ICONST_0).unwrap();
        mw.visit_insn(POP).unwrap();
        mw.visit_label(end).unwrap();
        mw.visit_insn(RETURN).unwrap();
        mw.visit_maxs(0, 0).unwrap();
        mw.visit_end().unwrap();
        // goto(3 bytes), then the two dead bytes became nop athrow.
        assert_eq!(mw.code.get_u8(3), NOP);
        assert_eq!(mw.code.get_u8(4), ATHROW);
        assert_eq!(mw.code.get_u8(5), RETURN);
        assert!(mw.max_stack() >= 1);
    }
}
