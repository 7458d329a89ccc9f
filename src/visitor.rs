//! The event surface between class file producers and consumers. A reader
//! drives these traits in class file order; the writers implement them to
//! assemble a new class. Every method has a no-op default so adapters only
//! override what they observe.
//!
//! Expected call orders follow the class file structure: for a class,
//! `visit (visit_source? visit_module? visit_nest_host? visit_outer_class?
//! (visit_annotation | visit_type_annotation | visit_attribute)*
//! (visit_nest_member | visit_permitted_subclass | visit_inner_class |
//! visit_record_component | visit_field | visit_method)* visit_end)`; for a
//! method, `(visit_parameter* visit_annotation_default?
//! (visit_annotation | visit_parameter_annotation | visit_attribute)*
//! (visit_code (visit_frame | visit_<xxx>_insn | visit_label |
//! visit_try_catch_block | visit_local_variable | visit_line_number)*
//! visit_maxs)? visit_end)`. Writers fail with `Error::IllegalState` when
//! events arrive out of order.

use crate::annotation::{Annotation, AnnotationValue, TypeAnnotation, TypePath};
use crate::attribute::Attribute;
use crate::constant::{Constant, Handle};
use crate::error::Result;
use crate::label::Label;
use crate::opcodes::AccessFlags;
use crate::version::ClassVersion;

/// How a stack map frame event describes its frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Expanded: absolute locals and stack.
    New,
    /// Compressed full_frame.
    Full,
    /// Compressed: same locals plus one to three extra, empty stack.
    Append,
    /// Compressed: same locals minus one to three (the count travels in
    /// `n_local`), empty stack.
    Chop,
    /// Compressed: identical to the previous frame, empty stack.
    Same,
    /// Compressed: same locals, one stack element.
    Same1,
}

/// One verification type in a frame event. Reference types carry internal
/// names or array descriptors; uninitialized types carry the label of their
/// `new` instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameItem {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(String),
    Uninitialized(Label),
}

/// Identity of a method inside an already-serialized class, offered by a
/// reader so an unmodified method can be copied verbatim instead of being
/// replayed event by event.
#[derive(Debug)]
pub struct MethodSourceInfo<'a> {
    /// Identity of the source class bytes (stable for one reader).
    pub source_id: usize,
    /// Byte range of the whole `method_info` in the source class.
    pub info_offset: usize,
    pub info_length: usize,
    pub signature: Option<&'a str>,
    pub exceptions: &'a [&'a str],
    pub has_synthetic_attribute: bool,
    pub has_deprecated_attribute: bool,
}

pub trait ClassVisitor {
    fn visit(
        &mut self,
        _version: ClassVersion,
        _access: AccessFlags,
        _name: &str,
        _signature: Option<&str>,
        _super_name: Option<&str>,
        _interfaces: &[&str],
    ) -> Result<()> {
        Ok(())
    }

    fn visit_source(&mut self, _file: Option<&str>, _debug: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn visit_module(
        &mut self,
        _name: &str,
        _access: AccessFlags,
        _version: Option<&str>,
    ) -> Result<Option<&mut dyn ModuleVisitor>> {
        Ok(None)
    }

    fn visit_nest_host(&mut self, _nest_host: &str) -> Result<()> {
        Ok(())
    }

    fn visit_outer_class(
        &mut self,
        _owner: &str,
        _method_name: Option<&str>,
        _method_descriptor: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_annotation(&mut self, _annotation: &Annotation, _visible: bool) -> Result<()> {
        Ok(())
    }

    fn visit_type_annotation(
        &mut self,
        _type_annotation: &TypeAnnotation,
        _visible: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_attribute(&mut self, _attribute: &Attribute) -> Result<()> {
        Ok(())
    }

    fn visit_nest_member(&mut self, _nest_member: &str) -> Result<()> {
        Ok(())
    }

    fn visit_permitted_subclass(&mut self, _permitted_subclass: &str) -> Result<()> {
        Ok(())
    }

    fn visit_inner_class(
        &mut self,
        _name: &str,
        _outer_name: Option<&str>,
        _inner_name: Option<&str>,
        _access: AccessFlags,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_record_component(
        &mut self,
        _name: &str,
        _descriptor: &str,
        _signature: Option<&str>,
    ) -> Result<Option<&mut dyn RecordComponentVisitor>> {
        Ok(None)
    }

    fn visit_field(
        &mut self,
        _access: AccessFlags,
        _name: &str,
        _descriptor: &str,
        _signature: Option<&str>,
        _value: Option<&Constant>,
    ) -> Result<Option<&mut dyn FieldVisitor>> {
        Ok(None)
    }

    fn visit_method(
        &mut self,
        _access: AccessFlags,
        _name: &str,
        _descriptor: &str,
        _signature: Option<&str>,
        _exceptions: &[&str],
    ) -> Result<Option<&mut dyn MethodVisitor>> {
        Ok(None)
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait FieldVisitor {
    fn visit_annotation(&mut self, _annotation: &Annotation, _visible: bool) -> Result<()> {
        Ok(())
    }

    fn visit_type_annotation(
        &mut self,
        _type_annotation: &TypeAnnotation,
        _visible: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_attribute(&mut self, _attribute: &Attribute) -> Result<()> {
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait RecordComponentVisitor {
    fn visit_annotation(&mut self, _annotation: &Annotation, _visible: bool) -> Result<()> {
        Ok(())
    }

    fn visit_type_annotation(
        &mut self,
        _type_annotation: &TypeAnnotation,
        _visible: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_attribute(&mut self, _attribute: &Attribute) -> Result<()> {
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait ModuleVisitor {
    fn visit_main_class(&mut self, _main_class: &str) -> Result<()> {
        Ok(())
    }

    fn visit_package(&mut self, _package: &str) -> Result<()> {
        Ok(())
    }

    fn visit_require(
        &mut self,
        _module: &str,
        _access: AccessFlags,
        _version: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_export(
        &mut self,
        _package: &str,
        _access: AccessFlags,
        _modules: &[&str],
    ) -> Result<()> {
        Ok(())
    }

    fn visit_open(
        &mut self,
        _package: &str,
        _access: AccessFlags,
        _modules: &[&str],
    ) -> Result<()> {
        Ok(())
    }

    fn visit_use(&mut self, _service: &str) -> Result<()> {
        Ok(())
    }

    fn visit_provide(&mut self, _service: &str, _providers: &[&str]) -> Result<()> {
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait MethodVisitor {
    fn visit_parameter(&mut self, _name: Option<&str>, _access: AccessFlags) -> Result<()> {
        Ok(())
    }

    fn visit_annotation_default(&mut self, _value: &AnnotationValue) -> Result<()> {
        Ok(())
    }

    fn visit_annotation(&mut self, _annotation: &Annotation, _visible: bool) -> Result<()> {
        Ok(())
    }

    fn visit_type_annotation(
        &mut self,
        _type_annotation: &TypeAnnotation,
        _visible: bool,
    ) -> Result<()> {
        Ok(())
    }

    /// Overrides the implicit parameter count of the parameter annotation
    /// attribute, for compilers that annotate only a suffix of the
    /// parameters.
    fn visit_annotable_parameter_count(&mut self, _count: u16, _visible: bool) -> Result<()> {
        Ok(())
    }

    fn visit_parameter_annotation(
        &mut self,
        _parameter: u16,
        _annotation: &Annotation,
        _visible: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_attribute(&mut self, _attribute: &Attribute) -> Result<()> {
        Ok(())
    }

    /// Offered by a reader before replaying a method's events; returning
    /// true commits this visitor to emitting the source bytes verbatim and
    /// the reader skips the replay (no other events, not even `visit_end`,
    /// follow for this method).
    fn visit_method_source(&mut self, _source: &MethodSourceInfo<'_>) -> bool {
        false
    }

    fn visit_code(&mut self) -> Result<()> {
        Ok(())
    }

    fn visit_frame(
        &mut self,
        _kind: FrameKind,
        _n_local: u16,
        _locals: &[FrameItem],
        _n_stack: u16,
        _stack: &[FrameItem],
    ) -> Result<()> {
        Ok(())
    }

    fn visit_insn(&mut self, _opcode: u8) -> Result<()> {
        Ok(())
    }

    fn visit_int_insn(&mut self, _opcode: u8, _operand: i32) -> Result<()> {
        Ok(())
    }

    fn visit_var_insn(&mut self, _opcode: u8, _var: u16) -> Result<()> {
        Ok(())
    }

    fn visit_type_insn(&mut self, _opcode: u8, _type_name: &str) -> Result<()> {
        Ok(())
    }

    fn visit_field_insn(
        &mut self,
        _opcode: u8,
        _owner: &str,
        _name: &str,
        _descriptor: &str,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_method_insn(
        &mut self,
        _opcode: u8,
        _owner: &str,
        _name: &str,
        _descriptor: &str,
        _is_interface: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        _name: &str,
        _descriptor: &str,
        _bootstrap_method: &Handle,
        _bootstrap_arguments: &[Constant],
    ) -> Result<()> {
        Ok(())
    }

    fn visit_jump_insn(&mut self, _opcode: u8, _label: Label) -> Result<()> {
        Ok(())
    }

    fn visit_label(&mut self, _label: Label) -> Result<()> {
        Ok(())
    }

    fn visit_ldc_insn(&mut self, _value: &Constant) -> Result<()> {
        Ok(())
    }

    fn visit_iinc_insn(&mut self, _var: u16, _increment: i16) -> Result<()> {
        Ok(())
    }

    fn visit_table_switch_insn(
        &mut self,
        _min: i32,
        _max: i32,
        _default: Label,
        _labels: &[Label],
    ) -> Result<()> {
        Ok(())
    }

    fn visit_lookup_switch_insn(
        &mut self,
        _default: Label,
        _keys: &[i32],
        _labels: &[Label],
    ) -> Result<()> {
        Ok(())
    }

    fn visit_multi_a_new_array_insn(&mut self, _descriptor: &str, _dimensions: u8) -> Result<()> {
        Ok(())
    }

    fn visit_insn_annotation(
        &mut self,
        _type_annotation: &TypeAnnotation,
        _visible: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_try_catch_block(
        &mut self,
        _start: Label,
        _end: Label,
        _handler: Label,
        _catch_type: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_try_catch_annotation(
        &mut self,
        _type_annotation: &TypeAnnotation,
        _visible: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_local_variable(
        &mut self,
        _name: &str,
        _descriptor: &str,
        _signature: Option<&str>,
        _start: Label,
        _end: Label,
        _index: u16,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_local_variable_annotation(
        &mut self,
        _type_ref: u32,
        _type_path: Option<&TypePath>,
        _start: &[Label],
        _end: &[Label],
        _index: &[u16],
        _annotation: &Annotation,
        _visible: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_line_number(&mut self, _line: u16, _start: Label) -> Result<()> {
        Ok(())
    }

    fn visit_maxs(&mut self, _max_stack: u16, _max_locals: u16) -> Result<()> {
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}
