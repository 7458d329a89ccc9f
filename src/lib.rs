//! Reading, transforming and emitting Java class files (JVMS §4).
//!
//! The crate exposes the class file as an ordered stream of visitor events:
//! [`reader::ClassReader`] decodes a class and drives a
//! [`visitor::ClassVisitor`]; [`class::ClassWriter`] implements the same
//! traits and assembles a new class from the events it receives. Chaining a
//! reader into a writer (optionally through user adapters) is the intended
//! way to transform classes.
//!
//! The writer can optionally compute `max_stack`/`max_locals`
//! ([`class::Compute::Maxs`]) or full stack map frames
//! ([`class::Compute::Frames`]) so generators and transformers do not have
//! to.

// Ensure each result error is either unwrapped or returned
#![deny(unused_must_use)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;
#[macro_use]
extern crate num_derive;

pub mod annotation;
pub mod attribute;
pub mod bytes;
pub mod class;
pub mod constant;
pub mod descriptor;
pub mod error;
pub mod field;
pub mod label;
pub mod method;
pub mod module;
pub mod opcodes;
pub mod reader;
pub mod symbol;
pub mod version;
pub mod visitor;

mod frame;

pub use crate::annotation::{Annotation, AnnotationValue, TypeAnnotation, TypePath};
pub use crate::attribute::Attribute;
pub use crate::class::{ClassWriter, Compute};
pub use crate::constant::{Constant, ConstantDynamic, Handle, ReferenceKind};
pub use crate::error::{Error, Result};
pub use crate::field::FieldWriter;
pub use crate::label::Label;
pub use crate::method::MethodWriter;
pub use crate::opcodes::AccessFlags;
pub use crate::reader::{ClassReader, ParsingOptions};
pub use crate::version::ClassVersion;
pub use crate::visitor::{
    ClassVisitor, FieldVisitor, FrameItem, FrameKind, MethodVisitor, ModuleVisitor,
    RecordComponentVisitor,
};
