//! Decodes a class file and replays it as an ordered sequence of visitor
//! events. The reader validates structure as it goes and fails with
//! `MalformedInput` on unknown pool tags, truncated attributes or
//! inconsistent lengths; semantic verification of the bytecode itself is the
//! JVM's business, not ours.

use std::rc::Rc;

use byteorder::{BigEndian, ByteOrder};
use hashbrown::HashMap;

use crate::annotation::{Annotation, AnnotationValue, TypeAnnotation, TypePath};
use crate::attribute::Attribute;
use crate::constant::{Constant, ConstantDynamic, Handle, ReferenceKind};
use crate::error::{Error, Result};
use crate::label::Label;
use crate::opcodes::*;
use crate::symbol::{self, Symbol, SymbolTable};
use crate::version::ClassVersion;
use crate::visitor::{ClassVisitor, FrameItem, FrameKind, MethodSourceInfo, MethodVisitor};

use num_traits::FromPrimitive;

bitflags! {
    pub struct ParsingOptions: u32 {
        /// Do not visit Code attributes.
        const SKIP_CODE = 1;
        /// Do not visit SourceFile, SourceDebugExtension, LineNumberTable,
        /// LocalVariable(Type)Table or MethodParameters.
        const SKIP_DEBUG = 2;
        /// Do not visit stack map frames.
        const SKIP_FRAMES = 4;
        /// Visit every frame in expanded (`F_NEW`) form.
        const EXPAND_FRAMES = 8;
        /// Expand the writer-internal wide branch opcodes into standard
        /// goto_w forms. Used by the writer's own round trip; implies
        /// EXPAND_FRAMES because expansion shifts bytecode offsets.
        const EXPAND_WIDE_BRANCHES = 256;
    }
}

pub struct ClassReader {
    data: Rc<Vec<u8>>,
    /// Content offset (one past the tag byte) of each pool item; zero for
    /// index 0 and for the unusable slot after a long or double.
    pool_offsets: Vec<usize>,
    pool_count: u16,
    /// Offset of the access_flags field, right after the pool.
    header: usize,
    version: ClassVersion,
    /// Absolute offset of each entry of the BootstrapMethods attribute.
    bootstrap_offsets: Vec<usize>,
    /// Byte range of the BootstrapMethods entries (for pool seeding).
    bootstrap_range: Option<(usize, usize)>,
}

impl ClassReader {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        let mut reader = ClassReader {
            data: Rc::new(data),
            pool_offsets: Vec::new(),
            pool_count: 0,
            header: 0,
            version: ClassVersion(0, 0),
            bootstrap_offsets: Vec::new(),
            bootstrap_range: None,
        };
        if reader.u32_at(0)? != 0xCAFE_BABE {
            return Err(Error::malformed(0, "bad magic number"));
        }
        reader.version = ClassVersion(reader.u16_at(6)?, reader.u16_at(4)?);

        let pool_count = reader.u16_at(8)?;
        reader.pool_count = pool_count;
        reader.pool_offsets = vec![0; pool_count as usize];
        let mut offset = 10usize;
        let mut index = 1u16;
        while index < pool_count {
            reader.pool_offsets[index as usize] = offset + 1;
            let tag = reader.u8_at(offset)?;
            let item_size = match tag {
                symbol::CONSTANT_UTF8_TAG => 3 + reader.u16_at(offset + 1)? as usize,
                symbol::CONSTANT_INTEGER_TAG | symbol::CONSTANT_FLOAT_TAG => 5,
                symbol::CONSTANT_LONG_TAG | symbol::CONSTANT_DOUBLE_TAG => {
                    index += 1;
                    9
                }
                symbol::CONSTANT_CLASS_TAG
                | symbol::CONSTANT_STRING_TAG
                | symbol::CONSTANT_METHOD_TYPE_TAG
                | symbol::CONSTANT_MODULE_TAG
                | symbol::CONSTANT_PACKAGE_TAG => 3,
                symbol::CONSTANT_FIELDREF_TAG
                | symbol::CONSTANT_METHODREF_TAG
                | symbol::CONSTANT_INTERFACE_METHODREF_TAG
                | symbol::CONSTANT_NAME_AND_TYPE_TAG
                | symbol::CONSTANT_DYNAMIC_TAG
                | symbol::CONSTANT_INVOKE_DYNAMIC_TAG => 5,
                symbol::CONSTANT_METHOD_HANDLE_TAG => 4,
                _ => {
                    return Err(Error::malformed(
                        offset,
                        format!("unknown constant pool tag {}", tag),
                    ))
                }
            };
            offset += item_size;
            index += 1;
        }
        reader.header = offset;
        if reader.header + 8 > reader.data.len() {
            return Err(Error::malformed(offset, "truncated class file header"));
        }
        reader.locate_bootstrap_methods()?;
        trace!(
            "parsed header of {}: version {:?}, {} pool items",
            reader.class_name().unwrap_or_default(),
            reader.version,
            pool_count
        );
        Ok(reader)
    }

    pub fn version(&self) -> ClassVersion {
        self.version
    }

    pub(crate) fn bytes(&self) -> Rc<Vec<u8>> {
        self.data.clone()
    }

    pub fn access_flags(&self) -> Result<AccessFlags> {
        Ok(AccessFlags::from_bits_truncate(
            self.u16_at(self.header)? as u32
        ))
    }

    pub fn class_name(&self) -> Result<String> {
        self.class_name_item(self.u16_at(self.header + 2)?)
    }

    pub fn super_name(&self) -> Result<Option<String>> {
        let index = self.u16_at(self.header + 4)?;
        if index == 0 {
            Ok(None)
        } else {
            Ok(Some(self.class_name_item(index)?))
        }
    }

    pub fn interfaces(&self) -> Result<Vec<String>> {
        let count = self.u16_at(self.header + 6)?;
        let mut interfaces = Vec::with_capacity(count as usize);
        for i in 0..count {
            interfaces.push(self.class_name_item(self.u16_at(self.header + 8 + 2 * i as usize)?)?);
        }
        Ok(interfaces)
    }

    // ------------------------------------------------------------------
    // Primitive accessors
    // ------------------------------------------------------------------

    fn u8_at(&self, offset: usize) -> Result<u8> {
        self.data
            .get(offset)
            .copied()
            .ok_or_else(|| Error::malformed(offset, "read past end of class file"))
    }

    fn u16_at(&self, offset: usize) -> Result<u16> {
        if offset + 2 > self.data.len() {
            return Err(Error::malformed(offset, "read past end of class file"));
        }
        Ok(BigEndian::read_u16(&self.data[offset..]))
    }

    fn i16_at(&self, offset: usize) -> Result<i16> {
        Ok(self.u16_at(offset)? as i16)
    }

    fn u32_at(&self, offset: usize) -> Result<u32> {
        if offset + 4 > self.data.len() {
            return Err(Error::malformed(offset, "read past end of class file"));
        }
        Ok(BigEndian::read_u32(&self.data[offset..]))
    }

    fn i32_at(&self, offset: usize) -> Result<i32> {
        Ok(self.u32_at(offset)? as i32)
    }

    fn u64_at(&self, offset: usize) -> Result<u64> {
        Ok(((self.u32_at(offset)? as u64) << 32) | self.u32_at(offset + 4)? as u64)
    }

    // ------------------------------------------------------------------
    // Pool item accessors
    // ------------------------------------------------------------------

    fn item_offset(&self, index: u16) -> Result<usize> {
        match self.pool_offsets.get(index as usize) {
            Some(&offset) if offset != 0 => Ok(offset),
            _ => Err(Error::malformed(
                0,
                format!("invalid constant pool index {}", index),
            )),
        }
    }

    fn item_tag(&self, index: u16) -> Result<u8> {
        let offset = self.item_offset(index)?;
        self.u8_at(offset - 1)
    }

    fn utf8_item(&self, index: u16) -> Result<String> {
        let offset = self.item_offset(index)?;
        let length = self.u16_at(offset)? as usize;
        if offset + 2 + length > self.data.len() {
            return Err(Error::malformed(offset, "truncated utf8 constant"));
        }
        match cesu8::from_java_cesu8(&self.data[offset + 2..offset + 2 + length]) {
            Ok(text) => Ok(text.into_owned()),
            Err(_) => Err(Error::malformed(offset, "invalid modified utf8")),
        }
    }

    fn class_name_item(&self, index: u16) -> Result<String> {
        let offset = self.item_offset(index)?;
        self.utf8_item(self.u16_at(offset)?)
    }

    fn name_and_type_item(&self, index: u16) -> Result<(String, String)> {
        let offset = self.item_offset(index)?;
        Ok((
            self.utf8_item(self.u16_at(offset)?)?,
            self.utf8_item(self.u16_at(offset + 2)?)?,
        ))
    }

    /// `(owner, name, descriptor, is_interface)` of a field/method reference.
    fn member_ref_item(&self, index: u16) -> Result<(String, String, String, bool)> {
        let tag = self.item_tag(index)?;
        let offset = self.item_offset(index)?;
        let owner = self.class_name_item(self.u16_at(offset)?)?;
        let (name, descriptor) = self.name_and_type_item(self.u16_at(offset + 2)?)?;
        Ok((
            owner,
            name,
            descriptor,
            tag == symbol::CONSTANT_INTERFACE_METHODREF_TAG,
        ))
    }

    fn handle_item(&self, index: u16) -> Result<Handle> {
        let offset = self.item_offset(index)?;
        let kind_value = self.u8_at(offset)?;
        let kind = ReferenceKind::from_u8(kind_value).ok_or_else(|| {
            Error::malformed(offset, format!("invalid reference kind {}", kind_value))
        })?;
        let (owner, name, descriptor, is_interface) =
            self.member_ref_item(self.u16_at(offset + 1)?)?;
        Ok(Handle {
            kind,
            owner,
            name,
            descriptor,
            is_interface,
        })
    }

    /// Decodes a loadable constant (an `ldc` operand or bootstrap argument).
    fn constant_item(&self, index: u16) -> Result<Constant> {
        let tag = self.item_tag(index)?;
        let offset = self.item_offset(index)?;
        Ok(match tag {
            symbol::CONSTANT_INTEGER_TAG => Constant::Integer(self.i32_at(offset)?),
            symbol::CONSTANT_FLOAT_TAG => Constant::Float(f32::from_bits(self.u32_at(offset)?)),
            symbol::CONSTANT_LONG_TAG => Constant::Long(self.u64_at(offset)? as i64),
            symbol::CONSTANT_DOUBLE_TAG => Constant::Double(f64::from_bits(self.u64_at(offset)?)),
            symbol::CONSTANT_STRING_TAG => {
                Constant::String(self.utf8_item(self.u16_at(offset)?)?)
            }
            symbol::CONSTANT_CLASS_TAG => Constant::Class(self.utf8_item(self.u16_at(offset)?)?),
            symbol::CONSTANT_METHOD_TYPE_TAG => {
                Constant::MethodType(self.utf8_item(self.u16_at(offset)?)?)
            }
            symbol::CONSTANT_METHOD_HANDLE_TAG => Constant::MethodHandle(self.handle_item(index)?),
            symbol::CONSTANT_DYNAMIC_TAG => {
                let bootstrap_index = self.u16_at(offset)?;
                let (name, descriptor) = self.name_and_type_item(self.u16_at(offset + 2)?)?;
                let (bootstrap_method, bootstrap_arguments) =
                    self.bootstrap_entry(bootstrap_index)?;
                Constant::Dynamic(ConstantDynamic {
                    name,
                    descriptor,
                    bootstrap_method,
                    bootstrap_arguments,
                })
            }
            _ => {
                return Err(Error::malformed(
                    offset,
                    format!("constant tag {} is not loadable", tag),
                ))
            }
        })
    }

    fn bootstrap_entry(&self, bootstrap_index: u16) -> Result<(Handle, Vec<Constant>)> {
        let entry_offset = *self
            .bootstrap_offsets
            .get(bootstrap_index as usize)
            .ok_or_else(|| {
                Error::malformed(0, format!("invalid bootstrap index {}", bootstrap_index))
            })?;
        let handle = self.handle_item(self.u16_at(entry_offset)?)?;
        let argument_count = self.u16_at(entry_offset + 2)?;
        let mut arguments = Vec::with_capacity(argument_count as usize);
        for i in 0..argument_count {
            let index = self.u16_at(entry_offset + 4 + 2 * i as usize)?;
            arguments.push(self.constant_item(index)?);
        }
        Ok((handle, arguments))
    }

    // ------------------------------------------------------------------
    // Structure walking
    // ------------------------------------------------------------------

    /// Offset of the class-level attribute count, past fields and methods.
    fn class_attributes_offset(&self) -> Result<usize> {
        let interface_count = self.u16_at(self.header + 6)? as usize;
        let mut offset = self.header + 8 + 2 * interface_count;
        for _ in 0..2 {
            // fields, then methods
            let member_count = self.u16_at(offset)?;
            offset += 2;
            for _ in 0..member_count {
                offset = self.skip_attributes(offset + 6)?;
            }
        }
        Ok(offset)
    }

    /// Given the offset of an attribute count, returns the offset just past
    /// the attribute list.
    fn skip_attributes(&self, offset: usize) -> Result<usize> {
        let count = self.u16_at(offset)?;
        let mut offset = offset + 2;
        for _ in 0..count {
            let length = self.u32_at(offset + 2)? as usize;
            offset += 6 + length;
            if offset > self.data.len() {
                return Err(Error::malformed(offset, "truncated attribute"));
            }
        }
        Ok(offset)
    }

    fn locate_bootstrap_methods(&mut self) -> Result<()> {
        let attributes_offset = self.class_attributes_offset()?;
        let count = self.u16_at(attributes_offset)?;
        let mut offset = attributes_offset + 2;
        for _ in 0..count {
            let name = self.utf8_item(self.u16_at(offset)?)?;
            let length = self.u32_at(offset + 2)? as usize;
            if name == "BootstrapMethods" {
                let entry_count = self.u16_at(offset + 6)?;
                let mut entry_offset = offset + 8;
                for _ in 0..entry_count {
                    self.bootstrap_offsets.push(entry_offset);
                    let argument_count = self.u16_at(entry_offset + 2)? as usize;
                    entry_offset += 4 + 2 * argument_count;
                }
                self.bootstrap_range = Some((offset + 8, offset + 6 + length));
            }
            offset += 6 + length;
        }
        Ok(())
    }

    /// Copies the raw pool (and BootstrapMethods entries) into a writer's
    /// symbol table and replays every item so future adds deduplicate
    /// against the copied content.
    pub(crate) fn copy_pool(&self, table: &mut SymbolTable) -> Result<()> {
        table.seed_pool(&self.data[10..self.header], self.pool_count);
        for index in 1..self.pool_count {
            let content = self.pool_offsets[index as usize];
            if content == 0 {
                continue;
            }
            let tag = self.u8_at(content - 1)?;
            let mut entry = Symbol {
                index: index as u32,
                tag,
                owner: None,
                name: None,
                value: None,
                data: 0,
                info: 0,
            };
            match tag {
                symbol::CONSTANT_UTF8_TAG => entry.value = Some(self.utf8_item(index)?),
                symbol::CONSTANT_INTEGER_TAG | symbol::CONSTANT_FLOAT_TAG => {
                    entry.data = self.u32_at(content)? as u64;
                }
                symbol::CONSTANT_LONG_TAG | symbol::CONSTANT_DOUBLE_TAG => {
                    entry.data = self.u64_at(content)?;
                }
                symbol::CONSTANT_CLASS_TAG
                | symbol::CONSTANT_STRING_TAG
                | symbol::CONSTANT_METHOD_TYPE_TAG
                | symbol::CONSTANT_MODULE_TAG
                | symbol::CONSTANT_PACKAGE_TAG => {
                    entry.value = Some(self.utf8_item(self.u16_at(content)?)?);
                }
                symbol::CONSTANT_NAME_AND_TYPE_TAG => {
                    let (name, descriptor) = self.name_and_type_item(index)?;
                    entry.name = Some(name);
                    entry.value = Some(descriptor);
                }
                symbol::CONSTANT_FIELDREF_TAG
                | symbol::CONSTANT_METHODREF_TAG
                | symbol::CONSTANT_INTERFACE_METHODREF_TAG => {
                    let (owner, name, descriptor, _) = self.member_ref_item(index)?;
                    entry.owner = Some(owner);
                    entry.name = Some(name);
                    entry.value = Some(descriptor);
                }
                symbol::CONSTANT_METHOD_HANDLE_TAG => {
                    let kind = self.u8_at(content)?;
                    let (owner, name, descriptor, _) =
                        self.member_ref_item(self.u16_at(content + 1)?)?;
                    entry.owner = Some(owner);
                    entry.name = Some(name);
                    entry.value = Some(descriptor);
                    entry.data = kind as u64;
                }
                symbol::CONSTANT_DYNAMIC_TAG | symbol::CONSTANT_INVOKE_DYNAMIC_TAG => {
                    let (name, descriptor) =
                        self.name_and_type_item(self.u16_at(content + 2)?)?;
                    entry.name = Some(name);
                    entry.value = Some(descriptor);
                    entry.data = self.u16_at(content)? as u64;
                }
                _ => unreachable!("tag validated during pool scan"),
            }
            table.seed_entry(entry);
        }
        if let Some((start, end)) = self.bootstrap_range {
            let relative: Vec<usize> = self
                .bootstrap_offsets
                .iter()
                .map(|offset| offset - start)
                .collect();
            table.seed_bootstrap_methods(&self.data[start..end], &relative);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Annotation decoding
    // ------------------------------------------------------------------

    fn read_annotation(&self, offset: usize) -> Result<(Annotation, usize)> {
        let descriptor = self.utf8_item(self.u16_at(offset)?)?;
        let pair_count = self.u16_at(offset + 2)?;
        let mut annotation = Annotation::new(descriptor);
        let mut offset = offset + 4;
        for _ in 0..pair_count {
            let name = self.utf8_item(self.u16_at(offset)?)?;
            let (value, next) = self.read_element_value(offset + 2)?;
            annotation.values.push((name, value));
            offset = next;
        }
        Ok((annotation, offset))
    }

    fn read_element_value(&self, offset: usize) -> Result<(AnnotationValue, usize)> {
        let tag = self.u8_at(offset)?;
        let value_offset = offset + 1;
        let int_at = |index: u16| -> Result<i32> {
            let item = self.item_offset(index)?;
            self.i32_at(item)
        };
        Ok(match tag {
            b'B' => {
                let v = int_at(self.u16_at(value_offset)?)?;
                (AnnotationValue::Byte(v as i8), value_offset + 2)
            }
            b'C' => {
                let v = int_at(self.u16_at(value_offset)?)?;
                let c = char::from_u32(v as u32).unwrap_or('\u{FFFD}');
                (AnnotationValue::Char(c), value_offset + 2)
            }
            b'S' => {
                let v = int_at(self.u16_at(value_offset)?)?;
                (AnnotationValue::Short(v as i16), value_offset + 2)
            }
            b'Z' => {
                let v = int_at(self.u16_at(value_offset)?)?;
                (AnnotationValue::Boolean(v != 0), value_offset + 2)
            }
            b'I' => {
                let v = int_at(self.u16_at(value_offset)?)?;
                (AnnotationValue::Int(v), value_offset + 2)
            }
            b'J' => {
                let item = self.item_offset(self.u16_at(value_offset)?)?;
                (
                    AnnotationValue::Long(self.u64_at(item)? as i64),
                    value_offset + 2,
                )
            }
            b'F' => {
                let item = self.item_offset(self.u16_at(value_offset)?)?;
                (
                    AnnotationValue::Float(f32::from_bits(self.u32_at(item)?)),
                    value_offset + 2,
                )
            }
            b'D' => {
                let item = self.item_offset(self.u16_at(value_offset)?)?;
                (
                    AnnotationValue::Double(f64::from_bits(self.u64_at(item)?)),
                    value_offset + 2,
                )
            }
            b's' => (
                AnnotationValue::String(self.utf8_item(self.u16_at(value_offset)?)?),
                value_offset + 2,
            ),
            b'e' => {
                let descriptor = self.utf8_item(self.u16_at(value_offset)?)?;
                let value = self.utf8_item(self.u16_at(value_offset + 2)?)?;
                (
                    AnnotationValue::Enum { descriptor, value },
                    value_offset + 4,
                )
            }
            b'c' => (
                AnnotationValue::Class(self.utf8_item(self.u16_at(value_offset)?)?),
                value_offset + 2,
            ),
            b'@' => {
                let (annotation, next) = self.read_annotation(value_offset)?;
                (AnnotationValue::Annotation(annotation), next)
            }
            b'[' => {
                let count = self.u16_at(value_offset)?;
                let mut values = Vec::with_capacity(count as usize);
                let mut offset = value_offset + 2;
                for _ in 0..count {
                    let (value, next) = self.read_element_value(offset)?;
                    values.push(value);
                    offset = next;
                }
                (AnnotationValue::Array(values), offset)
            }
            _ => {
                return Err(Error::malformed(
                    offset,
                    format!("invalid element_value tag {}", tag as char),
                ))
            }
        })
    }

    /// Reads the `target_type`, `target_info` and `target_path` of a type
    /// annotation into a packed reference and a path, returning the offset
    /// of the annotation that follows. Local variable targets are handled
    /// by the code reader and rejected here.
    fn read_type_annotation_target(
        &self,
        offset: usize,
    ) -> Result<(u32, Option<TypePath>, usize)> {
        let target_type = self.u8_at(offset)? as u32;
        let (type_ref, info_end) = match target_type {
            0x00 | 0x01 | 0x16 => (
                (target_type << 24) | ((self.u8_at(offset + 1)? as u32) << 16),
                offset + 2,
            ),
            0x10 | 0x17 | 0x42 | 0x43 | 0x44 | 0x45 | 0x46 => (
                (target_type << 24) | ((self.u16_at(offset + 1)? as u32) << 8),
                offset + 3,
            ),
            0x11 | 0x12 => (
                (target_type << 24)
                    | ((self.u8_at(offset + 1)? as u32) << 16)
                    | ((self.u8_at(offset + 2)? as u32) << 8),
                offset + 3,
            ),
            0x13 | 0x14 | 0x15 => (target_type << 24, offset + 1),
            0x47 | 0x48 | 0x49 | 0x4A | 0x4B => (
                (target_type << 24)
                    | ((self.u16_at(offset + 1)? as u32) << 8)
                    | self.u8_at(offset + 3)? as u32,
                offset + 4,
            ),
            _ => {
                return Err(Error::malformed(
                    offset,
                    format!("invalid type annotation target {:#x}", target_type),
                ))
            }
        };
        let (path, annotation_offset) = self.read_type_path(info_end)?;
        Ok((type_ref, path, annotation_offset))
    }

    fn read_type_path(&self, offset: usize) -> Result<(Option<TypePath>, usize)> {
        let length = self.u8_at(offset)? as usize;
        if length == 0 {
            return Ok((None, offset + 1));
        }
        let mut steps = Vec::with_capacity(length);
        for i in 0..length {
            steps.push((
                self.u8_at(offset + 1 + 2 * i)?,
                self.u8_at(offset + 2 + 2 * i)?,
            ));
        }
        Ok((Some(TypePath::from_steps(steps)), offset + 1 + 2 * length))
    }
}

/// Attributes of one class/field/method, collected before its visit calls.
#[derive(Default)]
struct MemberAttributes {
    signature: Option<String>,
    synthetic: bool,
    deprecated: bool,
    constant_value: Option<u16>,
    exceptions: Vec<String>,
    annotations: Vec<(usize, bool)>,
    type_annotations: Vec<(usize, bool)>,
    parameter_annotations: Vec<(usize, bool)>,
    annotation_default: Option<usize>,
    method_parameters: Option<usize>,
    code: Option<usize>,
    custom: Vec<Attribute>,
    end: usize,
}

impl ClassReader {
    fn read_member_attributes(&self, offset: usize) -> Result<MemberAttributes> {
        let count = self.u16_at(offset)?;
        let mut attrs = MemberAttributes::default();
        let mut offset = offset + 2;
        for _ in 0..count {
            let name = self.utf8_item(self.u16_at(offset)?)?;
            let length = self.u32_at(offset + 2)? as usize;
            let content = offset + 6;
            if content + length > self.data.len() {
                return Err(Error::malformed(offset, "truncated attribute"));
            }
            match name.as_str() {
                "Signature" => {
                    attrs.signature = Some(self.utf8_item(self.u16_at(content)?)?);
                }
                "Synthetic" => attrs.synthetic = true,
                "Deprecated" => attrs.deprecated = true,
                "ConstantValue" => attrs.constant_value = Some(self.u16_at(content)?),
                "Exceptions" => {
                    let exception_count = self.u16_at(content)?;
                    for i in 0..exception_count {
                        attrs
                            .exceptions
                            .push(self.class_name_item(self.u16_at(content + 2 + 2 * i as usize)?)?);
                    }
                }
                "RuntimeVisibleAnnotations" => attrs.annotations.push((content, true)),
                "RuntimeInvisibleAnnotations" => attrs.annotations.push((content, false)),
                "RuntimeVisibleTypeAnnotations" => attrs.type_annotations.push((content, true)),
                "RuntimeInvisibleTypeAnnotations" => {
                    attrs.type_annotations.push((content, false))
                }
                "RuntimeVisibleParameterAnnotations" => {
                    attrs.parameter_annotations.push((content, true))
                }
                "RuntimeInvisibleParameterAnnotations" => {
                    attrs.parameter_annotations.push((content, false))
                }
                "AnnotationDefault" => attrs.annotation_default = Some(content),
                "MethodParameters" => attrs.method_parameters = Some(content),
                "Code" => attrs.code = Some(content),
                _ => attrs.custom.push(Attribute::new(
                    name.clone(),
                    self.data[content..content + length].to_vec(),
                )),
            }
            offset = content + length;
        }
        attrs.end = offset;
        Ok(attrs)
    }

    // ------------------------------------------------------------------
    // Top level accept
    // ------------------------------------------------------------------

    pub fn accept(
        &self,
        visitor: &mut dyn ClassVisitor,
        options: ParsingOptions,
    ) -> Result<()> {
        let mut access = AccessFlags::from_bits_truncate(self.u16_at(self.header)? as u32);
        let name = self.class_name()?;
        let super_name = self.super_name()?;
        let interfaces = self.interfaces()?;
        let interface_refs: Vec<&str> = interfaces.iter().map(String::as_str).collect();

        // Class attributes, pre-scanned so signature/deprecated reach the
        // initial visit call.
        let attributes_offset = self.class_attributes_offset()?;
        let attribute_count = self.u16_at(attributes_offset)?;
        let mut signature = None;
        let mut source_file = None;
        let mut source_debug = None;
        let mut module_offset = None;
        let mut module_packages = None;
        let mut module_main_class = None;
        let mut nest_host = None;
        let mut enclosing_method = None;
        let mut inner_classes = None;
        let mut nest_members = None;
        let mut permitted_subclasses = None;
        let mut record_offset = None;
        let mut annotation_lists: Vec<(usize, bool)> = Vec::new();
        let mut type_annotation_lists: Vec<(usize, bool)> = Vec::new();
        let mut custom: Vec<Attribute> = Vec::new();

        let mut offset = attributes_offset + 2;
        for _ in 0..attribute_count {
            let attribute_name = self.utf8_item(self.u16_at(offset)?)?;
            let length = self.u32_at(offset + 2)? as usize;
            let content = offset + 6;
            match attribute_name.as_str() {
                "Signature" => signature = Some(self.utf8_item(self.u16_at(content)?)?),
                "SourceFile" => source_file = Some(self.utf8_item(self.u16_at(content)?)?),
                "SourceDebugExtension" => {
                    let raw = &self.data[content..content + length];
                    source_debug = Some(
                        cesu8::from_java_cesu8(raw)
                            .map_err(|_| Error::malformed(content, "invalid debug extension"))?
                            .into_owned(),
                    );
                }
                "Deprecated" => access |= AccessFlags::DEPRECATED,
                "Synthetic" => access |= AccessFlags::SYNTHETIC,
                "Module" => module_offset = Some(content),
                "ModulePackages" => module_packages = Some(content),
                "ModuleMainClass" => {
                    module_main_class = Some(self.class_name_item(self.u16_at(content)?)?)
                }
                "NestHost" => nest_host = Some(self.class_name_item(self.u16_at(content)?)?),
                "EnclosingMethod" => enclosing_method = Some(content),
                "InnerClasses" => inner_classes = Some(content),
                "NestMembers" => nest_members = Some(content),
                "PermittedSubclasses" => permitted_subclasses = Some(content),
                "Record" => record_offset = Some(content),
                "RuntimeVisibleAnnotations" => annotation_lists.push((content, true)),
                "RuntimeInvisibleAnnotations" => annotation_lists.push((content, false)),
                "RuntimeVisibleTypeAnnotations" => type_annotation_lists.push((content, true)),
                "RuntimeInvisibleTypeAnnotations" => type_annotation_lists.push((content, false)),
                "BootstrapMethods" => {}
                _ => custom.push(Attribute::new(
                    attribute_name.clone(),
                    self.data[content..content + length].to_vec(),
                )),
            }
            offset = content + length;
        }

        visitor.visit(
            self.version,
            access,
            &name,
            signature.as_deref(),
            super_name.as_deref(),
            &interface_refs,
        )?;

        if !options.contains(ParsingOptions::SKIP_DEBUG)
            && (source_file.is_some() || source_debug.is_some())
        {
            visitor.visit_source(source_file.as_deref(), source_debug.as_deref())?;
        }

        if let Some(content) = module_offset {
            self.read_module(
                visitor,
                content,
                module_packages,
                module_main_class.as_deref(),
            )?;
        }
        if let Some(host) = &nest_host {
            visitor.visit_nest_host(host)?;
        }
        if let Some(content) = enclosing_method {
            let owner = self.class_name_item(self.u16_at(content)?)?;
            let method_index = self.u16_at(content + 2)?;
            let name_and_type = if method_index != 0 {
                Some(self.name_and_type_item(method_index)?)
            } else {
                None
            };
            visitor.visit_outer_class(
                &owner,
                name_and_type.as_ref().map(|(n, _)| n.as_str()),
                name_and_type.as_ref().map(|(_, d)| d.as_str()),
            )?;
        }

        for (content, visible) in &annotation_lists {
            let count = self.u16_at(*content)?;
            let mut offset = content + 2;
            for _ in 0..count {
                let (annotation, next) = self.read_annotation(offset)?;
                visitor.visit_annotation(&annotation, *visible)?;
                offset = next;
            }
        }
        for (content, visible) in &type_annotation_lists {
            let count = self.u16_at(*content)?;
            let mut offset = content + 2;
            for _ in 0..count {
                let (type_ref, type_path, annotation_offset) =
                    self.read_type_annotation_target(offset)?;
                let (annotation, next) = self.read_annotation(annotation_offset)?;
                visitor.visit_type_annotation(
                    &TypeAnnotation {
                        type_ref,
                        type_path,
                        annotation,
                    },
                    *visible,
                )?;
                offset = next;
            }
        }
        for attribute in &custom {
            visitor.visit_attribute(attribute)?;
        }

        if let Some(content) = nest_members {
            let count = self.u16_at(content)?;
            for i in 0..count {
                let member = self.class_name_item(self.u16_at(content + 2 + 2 * i as usize)?)?;
                visitor.visit_nest_member(&member)?;
            }
        }
        if let Some(content) = permitted_subclasses {
            let count = self.u16_at(content)?;
            for i in 0..count {
                let subclass = self.class_name_item(self.u16_at(content + 2 + 2 * i as usize)?)?;
                visitor.visit_permitted_subclass(&subclass)?;
            }
        }
        if let Some(content) = inner_classes {
            let count = self.u16_at(content)?;
            let mut offset = content + 2;
            for _ in 0..count {
                let inner = self.class_name_item(self.u16_at(offset)?)?;
                let outer_index = self.u16_at(offset + 2)?;
                let outer = if outer_index != 0 {
                    Some(self.class_name_item(outer_index)?)
                } else {
                    None
                };
                let inner_name_index = self.u16_at(offset + 4)?;
                let inner_name = if inner_name_index != 0 {
                    Some(self.utf8_item(inner_name_index)?)
                } else {
                    None
                };
                let inner_access =
                    AccessFlags::from_bits_truncate(self.u16_at(offset + 6)? as u32);
                visitor.visit_inner_class(
                    &inner,
                    outer.as_deref(),
                    inner_name.as_deref(),
                    inner_access,
                )?;
                offset += 8;
            }
        }
        if let Some(content) = record_offset {
            self.read_record_components(visitor, content)?;
        }

        // Fields.
        let interface_count = self.u16_at(self.header + 6)? as usize;
        let mut offset = self.header + 8 + 2 * interface_count;
        let field_count = self.u16_at(offset)?;
        offset += 2;
        trace!("reading {} field(s)", field_count);
        for _ in 0..field_count {
            offset = self.read_field(visitor, offset)?;
        }

        // Methods.
        let method_count = self.u16_at(offset)?;
        offset += 2;
        trace!("reading {} method(s)", method_count);
        for _ in 0..method_count {
            offset = self.read_method(visitor, offset, options)?;
        }

        visitor.visit_end()
    }

    fn read_module(
        &self,
        visitor: &mut dyn ClassVisitor,
        content: usize,
        packages: Option<usize>,
        main_class: Option<&str>,
    ) -> Result<()> {
        let module_name = {
            let offset = self.item_offset(self.u16_at(content)?)?;
            self.utf8_item(self.u16_at(offset)?)?
        };
        let module_access = AccessFlags::from_bits_truncate(self.u16_at(content + 2)? as u32);
        let version_index = self.u16_at(content + 4)?;
        let module_version = if version_index != 0 {
            Some(self.utf8_item(version_index)?)
        } else {
            None
        };
        let mv = match visitor.visit_module(
            &module_name,
            module_access,
            module_version.as_deref(),
        )? {
            Some(mv) => mv,
            None => return Ok(()),
        };

        if let Some(main) = main_class {
            mv.visit_main_class(main)?;
        }
        if let Some(packages_offset) = packages {
            let count = self.u16_at(packages_offset)?;
            for i in 0..count {
                let offset = self.item_offset(self.u16_at(packages_offset + 2 + 2 * i as usize)?)?;
                let package = self.utf8_item(self.u16_at(offset)?)?;
                mv.visit_package(&package)?;
            }
        }

        let mut offset = content + 6;
        let requires_count = self.u16_at(offset)?;
        offset += 2;
        for _ in 0..requires_count {
            let module_offset = self.item_offset(self.u16_at(offset)?)?;
            let required = self.utf8_item(self.u16_at(module_offset)?)?;
            let flags = AccessFlags::from_bits_truncate(self.u16_at(offset + 2)? as u32);
            let version_index = self.u16_at(offset + 4)?;
            let version = if version_index != 0 {
                Some(self.utf8_item(version_index)?)
            } else {
                None
            };
            mv.visit_require(&required, flags, version.as_deref())?;
            offset += 6;
        }

        for open in &[false, true] {
            let section_count = self.u16_at(offset)?;
            offset += 2;
            for _ in 0..section_count {
                let package_offset = self.item_offset(self.u16_at(offset)?)?;
                let package = self.utf8_item(self.u16_at(package_offset)?)?;
                let flags = AccessFlags::from_bits_truncate(self.u16_at(offset + 2)? as u32);
                let to_count = self.u16_at(offset + 4)?;
                let mut to_modules = Vec::with_capacity(to_count as usize);
                for i in 0..to_count {
                    let module_offset =
                        self.item_offset(self.u16_at(offset + 6 + 2 * i as usize)?)?;
                    to_modules.push(self.utf8_item(self.u16_at(module_offset)?)?);
                }
                let to_refs: Vec<&str> = to_modules.iter().map(String::as_str).collect();
                if *open {
                    mv.visit_open(&package, flags, &to_refs)?;
                } else {
                    mv.visit_export(&package, flags, &to_refs)?;
                }
                offset += 6 + 2 * to_count as usize;
            }
        }

        let uses_count = self.u16_at(offset)?;
        offset += 2;
        for _ in 0..uses_count {
            let service = self.class_name_item(self.u16_at(offset)?)?;
            mv.visit_use(&service)?;
            offset += 2;
        }

        let provides_count = self.u16_at(offset)?;
        offset += 2;
        for _ in 0..provides_count {
            let service = self.class_name_item(self.u16_at(offset)?)?;
            let with_count = self.u16_at(offset + 2)?;
            let mut providers = Vec::with_capacity(with_count as usize);
            for i in 0..with_count {
                providers.push(self.class_name_item(self.u16_at(offset + 4 + 2 * i as usize)?)?);
            }
            let provider_refs: Vec<&str> = providers.iter().map(String::as_str).collect();
            mv.visit_provide(&service, &provider_refs)?;
            offset += 4 + 2 * with_count as usize;
        }

        mv.visit_end()
    }

    fn read_record_components(
        &self,
        visitor: &mut dyn ClassVisitor,
        content: usize,
    ) -> Result<()> {
        let count = self.u16_at(content)?;
        let mut offset = content + 2;
        for _ in 0..count {
            let name = self.utf8_item(self.u16_at(offset)?)?;
            let descriptor = self.utf8_item(self.u16_at(offset + 2)?)?;
            let attrs = self.read_member_attributes(offset + 4)?;
            if let Some(rv) =
                visitor.visit_record_component(&name, &descriptor, attrs.signature.as_deref())?
            {
                for (list_offset, visible) in &attrs.annotations {
                    let list_count = self.u16_at(*list_offset)?;
                    let mut annotation_offset = list_offset + 2;
                    for _ in 0..list_count {
                        let (annotation, next) = self.read_annotation(annotation_offset)?;
                        rv.visit_annotation(&annotation, *visible)?;
                        annotation_offset = next;
                    }
                }
                for (list_offset, visible) in &attrs.type_annotations {
                    let list_count = self.u16_at(*list_offset)?;
                    let mut annotation_offset = list_offset + 2;
                    for _ in 0..list_count {
                        let (type_ref, type_path, after_target) =
                            self.read_type_annotation_target(annotation_offset)?;
                        let (annotation, next) = self.read_annotation(after_target)?;
                        rv.visit_type_annotation(
                            &TypeAnnotation {
                                type_ref,
                                type_path,
                                annotation,
                            },
                            *visible,
                        )?;
                        annotation_offset = next;
                    }
                }
                for attribute in &attrs.custom {
                    rv.visit_attribute(attribute)?;
                }
                rv.visit_end()?;
            }
            offset = attrs.end;
        }
        Ok(())
    }

    fn read_field(&self, visitor: &mut dyn ClassVisitor, offset: usize) -> Result<usize> {
        let mut access = AccessFlags::from_bits_truncate(self.u16_at(offset)? as u32);
        let name = self.utf8_item(self.u16_at(offset + 2)?)?;
        let descriptor = self.utf8_item(self.u16_at(offset + 4)?)?;
        let attrs = self.read_member_attributes(offset + 6)?;
        if attrs.synthetic {
            access |= AccessFlags::SYNTHETIC;
        }
        if attrs.deprecated {
            access |= AccessFlags::DEPRECATED;
        }
        let constant_value = match attrs.constant_value {
            Some(index) => Some(self.constant_item(index)?),
            None => None,
        };
        if let Some(fv) = visitor.visit_field(
            access,
            &name,
            &descriptor,
            attrs.signature.as_deref(),
            constant_value.as_ref(),
        )? {
            for (list_offset, visible) in &attrs.annotations {
                let count = self.u16_at(*list_offset)?;
                let mut annotation_offset = list_offset + 2;
                for _ in 0..count {
                    let (annotation, next) = self.read_annotation(annotation_offset)?;
                    fv.visit_annotation(&annotation, *visible)?;
                    annotation_offset = next;
                }
            }
            for (list_offset, visible) in &attrs.type_annotations {
                let count = self.u16_at(*list_offset)?;
                let mut annotation_offset = list_offset + 2;
                for _ in 0..count {
                    let (type_ref, type_path, after_target) =
                        self.read_type_annotation_target(annotation_offset)?;
                    let (annotation, next) = self.read_annotation(after_target)?;
                    fv.visit_type_annotation(
                        &TypeAnnotation {
                            type_ref,
                            type_path,
                            annotation,
                        },
                        *visible,
                    )?;
                    annotation_offset = next;
                }
            }
            for attribute in &attrs.custom {
                fv.visit_attribute(attribute)?;
            }
            fv.visit_end()?;
        }
        Ok(attrs.end)
    }

    fn read_method(
        &self,
        visitor: &mut dyn ClassVisitor,
        offset: usize,
        options: ParsingOptions,
    ) -> Result<usize> {
        let mut access = AccessFlags::from_bits_truncate(self.u16_at(offset)? as u32);
        let name = self.utf8_item(self.u16_at(offset + 2)?)?;
        let descriptor = self.utf8_item(self.u16_at(offset + 4)?)?;
        let attrs = self.read_member_attributes(offset + 6)?;
        if attrs.synthetic {
            access |= AccessFlags::SYNTHETIC;
        }
        if attrs.deprecated {
            access |= AccessFlags::DEPRECATED;
        }
        let exception_refs: Vec<&str> = attrs.exceptions.iter().map(String::as_str).collect();

        let mv = match visitor.visit_method(
            access,
            &name,
            &descriptor,
            attrs.signature.as_deref(),
            &exception_refs,
        )? {
            Some(mv) => mv,
            None => return Ok(attrs.end),
        };

        // Offer a verbatim copy when nothing in the replay would be altered
        // by parsing options.
        if options.is_empty() {
            let source = MethodSourceInfo {
                source_id: Rc::as_ptr(&self.data) as usize,
                info_offset: offset,
                info_length: attrs.end - offset,
                signature: attrs.signature.as_deref(),
                exceptions: &exception_refs,
                has_synthetic_attribute: attrs.synthetic,
                has_deprecated_attribute: attrs.deprecated,
            };
            if mv.visit_method_source(&source) {
                return Ok(attrs.end);
            }
        }

        if !options.contains(ParsingOptions::SKIP_DEBUG) {
            if let Some(content) = attrs.method_parameters {
                let count = self.u8_at(content)?;
                for i in 0..count as usize {
                    let name_index = self.u16_at(content + 1 + 4 * i)?;
                    let parameter_name = if name_index != 0 {
                        Some(self.utf8_item(name_index)?)
                    } else {
                        None
                    };
                    let flags =
                        AccessFlags::from_bits_truncate(self.u16_at(content + 3 + 4 * i)? as u32);
                    mv.visit_parameter(parameter_name.as_deref(), flags)?;
                }
            }
        }
        if let Some(content) = attrs.annotation_default {
            let (value, _) = self.read_element_value(content)?;
            mv.visit_annotation_default(&value)?;
        }
        for (list_offset, visible) in &attrs.annotations {
            let count = self.u16_at(*list_offset)?;
            let mut annotation_offset = list_offset + 2;
            for _ in 0..count {
                let (annotation, next) = self.read_annotation(annotation_offset)?;
                mv.visit_annotation(&annotation, *visible)?;
                annotation_offset = next;
            }
        }
        for (list_offset, visible) in &attrs.type_annotations {
            let count = self.u16_at(*list_offset)?;
            let mut annotation_offset = list_offset + 2;
            for _ in 0..count {
                let (type_ref, type_path, after_target) =
                    self.read_type_annotation_target(annotation_offset)?;
                let (annotation, next) = self.read_annotation(after_target)?;
                mv.visit_type_annotation(
                    &TypeAnnotation {
                        type_ref,
                        type_path,
                        annotation,
                    },
                    *visible,
                )?;
                annotation_offset = next;
            }
        }
        for (content, visible) in &attrs.parameter_annotations {
            let num_parameters = self.u8_at(*content)?;
            let declared = crate::descriptor::argument_types(&descriptor)?.len();
            if num_parameters as usize != declared {
                mv.visit_annotable_parameter_count(num_parameters as u16, *visible)?;
            }
            let mut annotation_offset = content + 1;
            for parameter in 0..num_parameters as u16 {
                let count = self.u16_at(annotation_offset)?;
                annotation_offset += 2;
                for _ in 0..count {
                    let (annotation, next) = self.read_annotation(annotation_offset)?;
                    mv.visit_parameter_annotation(parameter, &annotation, *visible)?;
                    annotation_offset = next;
                }
            }
        }
        for attribute in &attrs.custom {
            mv.visit_attribute(attribute)?;
        }

        if let Some(code_offset) = attrs.code {
            if !options.contains(ParsingOptions::SKIP_CODE) {
                mv.visit_code()?;
                self.read_code(mv, code_offset, access, &name, &descriptor, options)?;
            }
        }
        mv.visit_end()?;
        Ok(attrs.end)
    }
}

// ----------------------------------------------------------------------
// Code attribute decoding
// ----------------------------------------------------------------------

/// Incremental StackMap(Table) decoding state. Entries are decoded one ahead
/// of the instruction loop; the expanded locals/stack are maintained across
/// entries so compressed frames can be replayed in `F_NEW` form.
struct FrameCursor {
    offset: usize,
    remaining: u16,
    legacy: bool,
    bytecode_offset: i64,
    locals: Vec<FrameItem>,
    stack: Vec<FrameItem>,
    pending: Option<PendingFrame>,
}

struct PendingFrame {
    at: u32,
    kind: FrameKind,
    n_local: u16,
    delta_locals: Vec<FrameItem>,
    n_stack: u16,
    delta_stack: Vec<FrameItem>,
}

impl ClassReader {
    #[allow(clippy::too_many_arguments)]
    fn read_code(
        &self,
        mv: &mut dyn MethodVisitor,
        content: usize,
        access: AccessFlags,
        method_name: &str,
        descriptor: &str,
        options: ParsingOptions,
    ) -> Result<()> {
        let max_stack = self.u16_at(content)?;
        let max_locals = self.u16_at(content + 2)?;
        let code_length = self.u32_at(content + 4)? as usize;
        let code_start = content + 8;
        let code_end = code_start + code_length;
        if code_end > self.data.len() {
            return Err(Error::malformed(content, "truncated Code attribute"));
        }
        let expand_wide = options.contains(ParsingOptions::EXPAND_WIDE_BRANCHES);

        let mut label_present = vec![false; code_length + 1];
        let mark = |target: i64, label_present: &mut Vec<bool>| -> Result<()> {
            if target < 0 || target as usize > code_length {
                return Err(Error::malformed(
                    code_start,
                    format!("branch target {} outside code", target),
                ));
            }
            label_present[target as usize] = true;
            Ok(())
        };

        // First pass: find every instruction boundary that needs a label.
        let mut offset = 0usize;
        while offset < code_length {
            let abs = code_start + offset;
            let opcode = self.u8_at(abs)?;
            match opcode {
                IFEQ..=JSR | IFNULL | IFNONNULL => {
                    mark(offset as i64 + self.i16_at(abs + 1)? as i64, &mut label_present)?;
                    offset += 3;
                }
                GOTO_W | JSR_W => {
                    mark(offset as i64 + self.i32_at(abs + 1)? as i64, &mut label_present)?;
                    offset += 5;
                }
                WIDE_IFEQ..=WIDE_JSR | WIDE_IFNULL | WIDE_IFNONNULL => {
                    if !expand_wide {
                        return Err(Error::malformed(abs, "reserved opcode in code"));
                    }
                    mark(
                        offset as i64 + self.u16_at(abs + 1)? as i64,
                        &mut label_present,
                    )?;
                    let base = if opcode >= WIDE_IFNULL {
                        opcode - WIDE_NULL_JUMP_DELTA
                    } else {
                        opcode - WIDE_JUMP_DELTA
                    };
                    if base != GOTO && base != JSR {
                        // The reversed branch inserted during expansion
                        // targets the instruction after this one.
                        mark(offset as i64 + 3, &mut label_present)?;
                    }
                    offset += 3;
                }
                TABLESWITCH => {
                    let aligned = (offset + 4) & !3usize;
                    mark(
                        offset as i64 + self.i32_at(code_start + aligned)? as i64,
                        &mut label_present,
                    )?;
                    let low = self.i32_at(code_start + aligned + 4)?;
                    let high = self.i32_at(code_start + aligned + 8)?;
                    if high < low {
                        return Err(Error::malformed(abs, "tableswitch high < low"));
                    }
                    let count = (high - low + 1) as usize;
                    for i in 0..count {
                        mark(
                            offset as i64
                                + self.i32_at(code_start + aligned + 12 + 4 * i)? as i64,
                            &mut label_present,
                        )?;
                    }
                    offset = aligned + 12 + 4 * count;
                }
                LOOKUPSWITCH => {
                    let aligned = (offset + 4) & !3usize;
                    mark(
                        offset as i64 + self.i32_at(code_start + aligned)? as i64,
                        &mut label_present,
                    )?;
                    let pair_count = self.i32_at(code_start + aligned + 4)? as usize;
                    for i in 0..pair_count {
                        mark(
                            offset as i64
                                + self.i32_at(code_start + aligned + 12 + 8 * i)? as i64,
                            &mut label_present,
                        )?;
                    }
                    offset = aligned + 8 + 8 * pair_count;
                }
                WIDE => {
                    let wide_opcode = self.u8_at(abs + 1)?;
                    offset += if wide_opcode == IINC { 6 } else { 4 };
                }
                _ => offset += instruction_length(opcode, abs)?,
            }
        }

        // Exception table: labels plus the visitor events.
        let exception_offset = code_end;
        let exception_count = self.u16_at(exception_offset)? as usize;
        let mut exception_entries = Vec::with_capacity(exception_count);
        for i in 0..exception_count {
            let entry = exception_offset + 2 + 8 * i;
            let start = self.u16_at(entry)?;
            let end = self.u16_at(entry + 2)?;
            let handler = self.u16_at(entry + 4)?;
            let catch_type = self.u16_at(entry + 6)?;
            mark(start as i64, &mut label_present)?;
            mark(end as i64, &mut label_present)?;
            mark(handler as i64, &mut label_present)?;
            exception_entries.push((start, end, handler, catch_type));
        }

        // Code attributes.
        let attributes_offset = exception_offset + 2 + 8 * exception_count;
        let attribute_count = self.u16_at(attributes_offset)?;
        let mut line_number_tables = Vec::new();
        let mut local_variable_tables = Vec::new();
        let mut local_variable_type_tables = Vec::new();
        let mut stack_map: Option<(usize, u16, bool)> = None;
        let mut type_annotation_lists: Vec<(usize, bool)> = Vec::new();
        let mut attr_offset = attributes_offset + 2;
        for _ in 0..attribute_count {
            let attribute_name = self.utf8_item(self.u16_at(attr_offset)?)?;
            let length = self.u32_at(attr_offset + 2)? as usize;
            let attr_content = attr_offset + 6;
            match attribute_name.as_str() {
                "LineNumberTable" => line_number_tables.push(attr_content),
                "LocalVariableTable" => local_variable_tables.push(attr_content),
                "LocalVariableTypeTable" => local_variable_type_tables.push(attr_content),
                "StackMapTable" => {
                    stack_map = Some((attr_content + 2, self.u16_at(attr_content)?, false))
                }
                "StackMap" => {
                    stack_map = Some((attr_content + 2, self.u16_at(attr_content)?, true))
                }
                "RuntimeVisibleTypeAnnotations" => {
                    type_annotation_lists.push((attr_content, true))
                }
                "RuntimeInvisibleTypeAnnotations" => {
                    type_annotation_lists.push((attr_content, false))
                }
                _ => {}
            }
            attr_offset = attr_content + length;
        }

        if options.contains(ParsingOptions::SKIP_FRAMES) {
            stack_map = None;
        }

        // Debug tables want labels at their boundaries.
        let mut line_numbers: HashMap<u32, Vec<u16>> = HashMap::new();
        if !options.contains(ParsingOptions::SKIP_DEBUG) {
            for table in &line_number_tables {
                let count = self.u16_at(*table)? as usize;
                for i in 0..count {
                    let start = self.u16_at(table + 2 + 4 * i)?;
                    let line = self.u16_at(table + 4 + 4 * i)?;
                    mark(start as i64, &mut label_present)?;
                    line_numbers.entry(start as u32).or_default().push(line);
                }
            }
            for table in local_variable_tables.iter().chain(&local_variable_type_tables) {
                let count = self.u16_at(*table)? as usize;
                for i in 0..count {
                    let start = self.u16_at(table + 2 + 10 * i)?;
                    let range = self.u16_at(table + 4 + 10 * i)?;
                    mark(start as i64, &mut label_present)?;
                    mark(start as i64 + range as i64, &mut label_present)?;
                }
            }
        }

        // Code-level type annotations, sorted by target kind.
        let mut insn_annotations: HashMap<usize, Vec<(TypeAnnotation, bool)>> = HashMap::new();
        let mut try_catch_annotations: Vec<(TypeAnnotation, bool)> = Vec::new();
        #[allow(clippy::type_complexity)]
        let mut local_var_annotations: Vec<(
            u32,
            Option<TypePath>,
            Vec<(u16, u16, u16)>,
            Annotation,
            bool,
        )> = Vec::new();
        for (list_offset, visible) in &type_annotation_lists {
            let count = self.u16_at(*list_offset)?;
            let mut entry_offset = list_offset + 2;
            for _ in 0..count {
                let target_type = self.u8_at(entry_offset)?;
                if target_type == 0x40 || target_type == 0x41 {
                    let table_length = self.u16_at(entry_offset + 1)? as usize;
                    let mut ranges = Vec::with_capacity(table_length);
                    for i in 0..table_length {
                        let start = self.u16_at(entry_offset + 3 + 6 * i)?;
                        let range = self.u16_at(entry_offset + 5 + 6 * i)?;
                        let index = self.u16_at(entry_offset + 7 + 6 * i)?;
                        mark(start as i64, &mut label_present)?;
                        mark(start as i64 + range as i64, &mut label_present)?;
                        ranges.push((start, range, index));
                    }
                    let after_info = entry_offset + 3 + 6 * table_length;
                    let (path, annotation_offset) = self.read_type_path(after_info)?;
                    let (annotation, next) = self.read_annotation(annotation_offset)?;
                    local_var_annotations.push((
                        (target_type as u32) << 24,
                        path,
                        ranges,
                        annotation,
                        *visible,
                    ));
                    entry_offset = next;
                } else {
                    let instruction_offset = match target_type {
                        0x43..=0x4B => Some(self.u16_at(entry_offset + 1)? as usize),
                        _ => None,
                    };
                    let (type_ref, type_path, annotation_offset) =
                        self.read_type_annotation_target(entry_offset)?;
                    let (annotation, next) = self.read_annotation(annotation_offset)?;
                    let type_annotation = TypeAnnotation {
                        type_ref,
                        type_path,
                        annotation,
                    };
                    match instruction_offset {
                        Some(at) => insn_annotations
                            .entry(at)
                            .or_default()
                            .push((type_annotation, *visible)),
                        None => try_catch_annotations.push((type_annotation, *visible)),
                    }
                    entry_offset = next;
                }
            }
        }

        // Stack map prescan: uninitialized items need resolvable labels.
        if let Some((map_offset, count, legacy)) = stack_map {
            self.prescan_stack_map(map_offset, count, legacy, |uninitialized_offset| {
                label_present[uninitialized_offset.min(code_length)] = true;
            })?;
        }

        // Handlers are visited before any instruction.
        for (start, end, handler, catch_type) in &exception_entries {
            let catch_name = if *catch_type != 0 {
                Some(self.class_name_item(*catch_type)?)
            } else {
                None
            };
            mv.visit_try_catch_block(
                Label(*start as u32),
                Label(*end as u32),
                Label(*handler as u32),
                catch_name.as_deref(),
            )?;
        }

        // Frame decoding state.
        let mut cursor = match stack_map {
            Some((map_offset, count, legacy)) => {
                let mut cursor = FrameCursor {
                    offset: map_offset,
                    remaining: count,
                    legacy,
                    bytecode_offset: -1,
                    locals: self.implicit_frame_items(access, method_name, descriptor)?,
                    stack: Vec::new(),
                    pending: None,
                };
                self.decode_next_frame(&mut cursor)?;
                Some(cursor)
            }
            None => None,
        };
        let expand_frames = options.contains(ParsingOptions::EXPAND_FRAMES);

        // Second pass: replay instructions.
        let mut offset = 0usize;
        while offset < code_length {
            if label_present[offset] {
                mv.visit_label(Label(offset as u32))?;
                if let Some(lines) = line_numbers.get(&(offset as u32)) {
                    for line in lines {
                        mv.visit_line_number(*line, Label(offset as u32))?;
                    }
                }
            }
            if let Some(cursor_state) = cursor.as_mut() {
                if cursor_state
                    .pending
                    .as_ref()
                    .map_or(false, |pending| pending.at as usize == offset)
                {
                    let pending = cursor_state.pending.take().unwrap();
                    if expand_frames {
                        mv.visit_frame(
                            FrameKind::New,
                            cursor_state.locals.len() as u16,
                            &cursor_state.locals,
                            cursor_state.stack.len() as u16,
                            &cursor_state.stack,
                        )?;
                    } else {
                        mv.visit_frame(
                            pending.kind,
                            pending.n_local,
                            &pending.delta_locals,
                            pending.n_stack,
                            &pending.delta_stack,
                        )?;
                    }
                    self.decode_next_frame(cursor_state)?;
                }
            }
            let instruction_offset = offset;
            offset = self.read_instruction(mv, code_start, offset, expand_wide)?;
            if let Some(annotations) = insn_annotations.get(&instruction_offset) {
                for (type_annotation, visible) in annotations {
                    mv.visit_insn_annotation(type_annotation, *visible)?;
                }
            }
        }
        if label_present[code_length] {
            mv.visit_label(Label(code_length as u32))?;
        }

        if !options.contains(ParsingOptions::SKIP_DEBUG) {
            // Signatures from the type table, matched by (start, index).
            let mut signatures: HashMap<(u16, u16), String> = HashMap::new();
            for table in &local_variable_type_tables {
                let count = self.u16_at(*table)? as usize;
                for i in 0..count {
                    let entry = table + 2 + 10 * i;
                    let start = self.u16_at(entry)?;
                    let index = self.u16_at(entry + 8)?;
                    let signature = self.utf8_item(self.u16_at(entry + 6)?)?;
                    signatures.insert((start, index), signature);
                }
            }
            for table in &local_variable_tables {
                let count = self.u16_at(*table)? as usize;
                for i in 0..count {
                    let entry = table + 2 + 10 * i;
                    let start = self.u16_at(entry)?;
                    let range = self.u16_at(entry + 2)?;
                    let variable_name = self.utf8_item(self.u16_at(entry + 4)?)?;
                    let variable_descriptor = self.utf8_item(self.u16_at(entry + 6)?)?;
                    let index = self.u16_at(entry + 8)?;
                    mv.visit_local_variable(
                        &variable_name,
                        &variable_descriptor,
                        signatures.get(&(start, index)).map(String::as_str),
                        Label(start as u32),
                        Label((start + range) as u32),
                        index,
                    )?;
                }
            }
        }

        for (type_ref, path, ranges, annotation, visible) in &local_var_annotations {
            let starts: Vec<Label> = ranges.iter().map(|(s, _, _)| Label(*s as u32)).collect();
            let ends: Vec<Label> = ranges
                .iter()
                .map(|(s, l, _)| Label((*s + *l) as u32))
                .collect();
            let indexes: Vec<u16> = ranges.iter().map(|(_, _, i)| *i).collect();
            mv.visit_local_variable_annotation(
                *type_ref,
                path.as_ref(),
                &starts,
                &ends,
                &indexes,
                annotation,
                *visible,
            )?;
        }
        for (type_annotation, visible) in &try_catch_annotations {
            mv.visit_try_catch_annotation(type_annotation, *visible)?;
        }

        mv.visit_maxs(max_stack, max_locals)
    }

    /// Replays the instruction at `offset` and returns the offset of the
    /// next one.
    fn read_instruction(
        &self,
        mv: &mut dyn MethodVisitor,
        code_start: usize,
        offset: usize,
        expand_wide: bool,
    ) -> Result<usize> {
        let abs = code_start + offset;
        let opcode = self.u8_at(abs)?;
        Ok(match opcode {
            NOP..=DCONST_1
            | IALOAD..=SALOAD
            | IASTORE..=SASTORE
            | POP..=SWAP
            | IADD..=LXOR
            | I2L..=DCMPG
            | IRETURN..=RETURN
            | ARRAYLENGTH
            | ATHROW
            | MONITORENTER
            | MONITOREXIT => {
                mv.visit_insn(opcode)?;
                offset + 1
            }
            BIPUSH => {
                mv.visit_int_insn(BIPUSH, self.u8_at(abs + 1)? as i8 as i32)?;
                offset + 2
            }
            SIPUSH => {
                mv.visit_int_insn(SIPUSH, self.i16_at(abs + 1)? as i32)?;
                offset + 3
            }
            NEWARRAY => {
                mv.visit_int_insn(NEWARRAY, self.u8_at(abs + 1)? as i32)?;
                offset + 2
            }
            LDC => {
                let constant = self.constant_item(self.u8_at(abs + 1)? as u16)?;
                mv.visit_ldc_insn(&constant)?;
                offset + 2
            }
            LDC_W | LDC2_W => {
                let constant = self.constant_item(self.u16_at(abs + 1)?)?;
                mv.visit_ldc_insn(&constant)?;
                offset + 3
            }
            ILOAD..=ALOAD => {
                mv.visit_var_insn(opcode, self.u8_at(abs + 1)? as u16)?;
                offset + 2
            }
            ILOAD_0..=0x2d => {
                let packed = opcode - ILOAD_0;
                mv.visit_var_insn(ILOAD + (packed >> 2), (packed & 3) as u16)?;
                offset + 1
            }
            ISTORE..=ASTORE => {
                mv.visit_var_insn(opcode, self.u8_at(abs + 1)? as u16)?;
                offset + 2
            }
            ISTORE_0..=0x4e => {
                let packed = opcode - ISTORE_0;
                mv.visit_var_insn(ISTORE + (packed >> 2), (packed & 3) as u16)?;
                offset + 1
            }
            IINC => {
                mv.visit_iinc_insn(self.u8_at(abs + 1)? as u16, self.u8_at(abs + 2)? as i8 as i16)?;
                offset + 3
            }
            IFEQ..=JSR | IFNULL | IFNONNULL => {
                let target = offset as i64 + self.i16_at(abs + 1)? as i64;
                mv.visit_jump_insn(opcode, Label(target as u32))?;
                offset + 3
            }
            GOTO_W | JSR_W => {
                let target = offset as i64 + self.i32_at(abs + 1)? as i64;
                if expand_wide {
                    // Keep the wide form so re-emission cannot overflow
                    // again.
                    mv.visit_jump_insn(opcode, Label(target as u32))?;
                } else {
                    let narrow = if opcode == GOTO_W { GOTO } else { JSR };
                    mv.visit_jump_insn(narrow, Label(target as u32))?;
                }
                offset + 5
            }
            WIDE_IFEQ..=WIDE_JSR | WIDE_IFNULL | WIDE_IFNONNULL => {
                // Internal forms produced by label resolution: the 16 bit
                // offset is unsigned and the branch must grow to a goto_w.
                let base = if opcode >= WIDE_IFNULL {
                    opcode - WIDE_NULL_JUMP_DELTA
                } else {
                    opcode - WIDE_JUMP_DELTA
                };
                let target = offset as i64 + self.u16_at(abs + 1)? as i64;
                if base == GOTO {
                    mv.visit_jump_insn(GOTO_W, Label(target as u32))?;
                } else if base == JSR {
                    mv.visit_jump_insn(JSR_W, Label(target as u32))?;
                } else {
                    let reversed = if base == IFNULL || base == IFNONNULL {
                        base ^ 1
                    } else {
                        ((base - 1) ^ 1) + 1
                    };
                    mv.visit_jump_insn(reversed, Label(offset as u32 + 3))?;
                    mv.visit_jump_insn(GOTO_W, Label(target as u32))?;
                }
                offset + 3
            }
            RET => {
                mv.visit_var_insn(RET, self.u8_at(abs + 1)? as u16)?;
                offset + 2
            }
            TABLESWITCH => {
                let aligned = (offset + 4) & !3usize;
                let default = offset as i64 + self.i32_at(code_start + aligned)? as i64;
                let low = self.i32_at(code_start + aligned + 4)?;
                let high = self.i32_at(code_start + aligned + 8)?;
                let count = (high - low + 1) as usize;
                let mut labels = Vec::with_capacity(count);
                for i in 0..count {
                    let target =
                        offset as i64 + self.i32_at(code_start + aligned + 12 + 4 * i)? as i64;
                    labels.push(Label(target as u32));
                }
                mv.visit_table_switch_insn(low, high, Label(default as u32), &labels)?;
                aligned + 12 + 4 * count
            }
            LOOKUPSWITCH => {
                let aligned = (offset + 4) & !3usize;
                let default = offset as i64 + self.i32_at(code_start + aligned)? as i64;
                let pair_count = self.i32_at(code_start + aligned + 4)? as usize;
                let mut keys = Vec::with_capacity(pair_count);
                let mut labels = Vec::with_capacity(pair_count);
                for i in 0..pair_count {
                    keys.push(self.i32_at(code_start + aligned + 8 + 8 * i)?);
                    let target =
                        offset as i64 + self.i32_at(code_start + aligned + 12 + 8 * i)? as i64;
                    labels.push(Label(target as u32));
                }
                mv.visit_lookup_switch_insn(Label(default as u32), &keys, &labels)?;
                aligned + 8 + 8 * pair_count
            }
            GETSTATIC..=PUTFIELD => {
                let (owner, member_name, member_descriptor, _) =
                    self.member_ref_item(self.u16_at(abs + 1)?)?;
                mv.visit_field_insn(opcode, &owner, &member_name, &member_descriptor)?;
                offset + 3
            }
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC => {
                let (owner, member_name, member_descriptor, is_interface) =
                    self.member_ref_item(self.u16_at(abs + 1)?)?;
                mv.visit_method_insn(
                    opcode,
                    &owner,
                    &member_name,
                    &member_descriptor,
                    is_interface,
                )?;
                offset + 3
            }
            INVOKEINTERFACE => {
                let (owner, member_name, member_descriptor, _) =
                    self.member_ref_item(self.u16_at(abs + 1)?)?;
                mv.visit_method_insn(
                    INVOKEINTERFACE,
                    &owner,
                    &member_name,
                    &member_descriptor,
                    true,
                )?;
                offset + 5
            }
            INVOKEDYNAMIC => {
                let item = self.item_offset(self.u16_at(abs + 1)?)?;
                let bootstrap_index = self.u16_at(item)?;
                let (dynamic_name, dynamic_descriptor) =
                    self.name_and_type_item(self.u16_at(item + 2)?)?;
                let (bootstrap_method, bootstrap_arguments) =
                    self.bootstrap_entry(bootstrap_index)?;
                mv.visit_invoke_dynamic_insn(
                    &dynamic_name,
                    &dynamic_descriptor,
                    &bootstrap_method,
                    &bootstrap_arguments,
                )?;
                offset + 5
            }
            NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
                let type_name = self.class_name_item(self.u16_at(abs + 1)?)?;
                mv.visit_type_insn(opcode, &type_name)?;
                offset + 3
            }
            MULTIANEWARRAY => {
                let type_descriptor = self.class_name_item(self.u16_at(abs + 1)?)?;
                mv.visit_multi_a_new_array_insn(&type_descriptor, self.u8_at(abs + 3)?)?;
                offset + 4
            }
            WIDE => {
                let wide_opcode = self.u8_at(abs + 1)?;
                if wide_opcode == IINC {
                    mv.visit_iinc_insn(self.u16_at(abs + 2)?, self.i16_at(abs + 4)?)?;
                    offset + 6
                } else {
                    mv.visit_var_insn(wide_opcode, self.u16_at(abs + 2)?)?;
                    offset + 4
                }
            }
            _ => {
                return Err(Error::malformed(
                    abs,
                    format!("unknown opcode {:#x}", opcode),
                ))
            }
        })
    }

    fn implicit_frame_items(
        &self,
        access: AccessFlags,
        method_name: &str,
        descriptor: &str,
    ) -> Result<Vec<FrameItem>> {
        let mut items = Vec::new();
        if !access.contains(AccessFlags::STATIC) {
            if method_name == "<init>" {
                items.push(FrameItem::UninitializedThis);
            } else {
                items.push(FrameItem::Object(self.class_name()?));
            }
        }
        for argument in crate::descriptor::argument_types(descriptor)? {
            use crate::descriptor::FieldDescriptor::*;
            items.push(match &argument {
                Byte | Char | Int | Short | Boolean => FrameItem::Integer,
                Float => FrameItem::Float,
                Long => FrameItem::Long,
                Double => FrameItem::Double,
                Object(name) => FrameItem::Object(name.clone()),
                Array(_) => FrameItem::Object(argument.to_string()),
                Void => {
                    return Err(Error::malformed(0, "void argument type"));
                }
            });
        }
        Ok(items)
    }

    fn read_verification_type(&self, offset: usize) -> Result<(FrameItem, usize)> {
        let tag = self.u8_at(offset)?;
        Ok(match tag {
            0 => (FrameItem::Top, offset + 1),
            1 => (FrameItem::Integer, offset + 1),
            2 => (FrameItem::Float, offset + 1),
            3 => (FrameItem::Double, offset + 1),
            4 => (FrameItem::Long, offset + 1),
            5 => (FrameItem::Null, offset + 1),
            6 => (FrameItem::UninitializedThis, offset + 1),
            7 => (
                FrameItem::Object(self.class_name_item(self.u16_at(offset + 1)?)?),
                offset + 3,
            ),
            8 => (
                FrameItem::Uninitialized(Label(self.u16_at(offset + 1)? as u32)),
                offset + 3,
            ),
            _ => {
                return Err(Error::malformed(
                    offset,
                    format!("invalid verification type tag {}", tag),
                ))
            }
        })
    }

    fn read_verification_type_list(&self, offset: usize) -> Result<(Vec<FrameItem>, usize)> {
        let count = self.u16_at(offset)? as usize;
        let mut items = Vec::with_capacity(count);
        let mut offset = offset + 2;
        for _ in 0..count {
            let (item, next) = self.read_verification_type(offset)?;
            items.push(item);
            offset = next;
        }
        Ok((items, offset))
    }

    /// Walks every verification type in the stack map, reporting the
    /// bytecode offset of each uninitialized item so a label exists there.
    fn prescan_stack_map(
        &self,
        map_offset: usize,
        count: u16,
        legacy: bool,
        mut on_uninitialized: impl FnMut(usize),
    ) -> Result<()> {
        let mut probe = FrameCursor {
            offset: map_offset,
            remaining: count,
            legacy,
            bytecode_offset: -1,
            locals: Vec::new(),
            stack: Vec::new(),
            pending: None,
        };
        loop {
            self.decode_next_frame(&mut probe)?;
            let pending = match probe.pending.take() {
                Some(pending) => pending,
                None => break,
            };
            for item in pending.delta_locals.iter().chain(pending.delta_stack.iter()) {
                if let FrameItem::Uninitialized(label) = item {
                    on_uninitialized(label.0 as usize);
                }
            }
        }
        Ok(())
    }

    /// Decodes the next stack map entry into `cursor.pending` and updates
    /// the expanded locals/stack state.
    fn decode_next_frame(&self, cursor: &mut FrameCursor) -> Result<()> {
        if cursor.remaining == 0 {
            cursor.pending = None;
            return Ok(());
        }
        cursor.remaining -= 1;

        if cursor.legacy {
            // Pre-1.6 StackMap: absolute offset, full frame, no compression.
            let at = self.u16_at(cursor.offset)?;
            let (locals, after_locals) = self.read_verification_type_list(cursor.offset + 2)?;
            let (stack, after_stack) = self.read_verification_type_list(after_locals)?;
            cursor.offset = after_stack;
            cursor.bytecode_offset = at as i64;
            cursor.locals = locals.clone();
            cursor.stack = stack.clone();
            cursor.pending = Some(PendingFrame {
                at: at as u32,
                kind: FrameKind::Full,
                n_local: locals.len() as u16,
                delta_locals: locals,
                n_stack: stack.len() as u16,
                delta_stack: stack,
            });
            return Ok(());
        }

        let frame_type = self.u8_at(cursor.offset)?;
        let mut offset = cursor.offset + 1;
        let (kind, delta, n_local, delta_locals, n_stack, delta_stack);
        match frame_type {
            0..=63 => {
                kind = FrameKind::Same;
                delta = frame_type as u16;
                n_local = 0;
                delta_locals = Vec::new();
                n_stack = 0;
                delta_stack = Vec::new();
            }
            64..=127 => {
                kind = FrameKind::Same1;
                delta = frame_type as u16 - 64;
                let (item, next) = self.read_verification_type(offset)?;
                offset = next;
                n_local = 0;
                delta_locals = Vec::new();
                n_stack = 1;
                delta_stack = vec![item];
            }
            247 => {
                kind = FrameKind::Same1;
                delta = self.u16_at(offset)?;
                let (item, next) = self.read_verification_type(offset + 2)?;
                offset = next;
                n_local = 0;
                delta_locals = Vec::new();
                n_stack = 1;
                delta_stack = vec![item];
            }
            248..=250 => {
                kind = FrameKind::Chop;
                delta = self.u16_at(offset)?;
                offset += 2;
                n_local = 251 - frame_type as u16;
                delta_locals = Vec::new();
                n_stack = 0;
                delta_stack = Vec::new();
            }
            251 => {
                kind = FrameKind::Same;
                delta = self.u16_at(offset)?;
                offset += 2;
                n_local = 0;
                delta_locals = Vec::new();
                n_stack = 0;
                delta_stack = Vec::new();
            }
            252..=254 => {
                kind = FrameKind::Append;
                delta = self.u16_at(offset)?;
                offset += 2;
                let append_count = frame_type as u16 - 251;
                let mut appended = Vec::with_capacity(append_count as usize);
                for _ in 0..append_count {
                    let (item, next) = self.read_verification_type(offset)?;
                    appended.push(item);
                    offset = next;
                }
                n_local = append_count;
                delta_locals = appended;
                n_stack = 0;
                delta_stack = Vec::new();
            }
            255 => {
                kind = FrameKind::Full;
                delta = self.u16_at(offset)?;
                let (locals, after_locals) = self.read_verification_type_list(offset + 2)?;
                let (stack, after_stack) = self.read_verification_type_list(after_locals)?;
                offset = after_stack;
                n_local = locals.len() as u16;
                delta_locals = locals;
                n_stack = stack.len() as u16;
                delta_stack = stack;
            }
            _ => {
                return Err(Error::malformed(
                    cursor.offset,
                    format!("invalid stack map frame type {}", frame_type),
                ))
            }
        }
        cursor.offset = offset;
        cursor.bytecode_offset = if cursor.bytecode_offset < 0 {
            delta as i64
        } else {
            cursor.bytecode_offset + delta as i64 + 1
        };

        // Apply the delta to the expanded state.
        match kind {
            FrameKind::Same => cursor.stack.clear(),
            FrameKind::Same1 => {
                cursor.stack.clear();
                cursor
                    .stack
                    .push(delta_stack.first().cloned().unwrap_or(FrameItem::Top));
            }
            FrameKind::Chop => {
                for _ in 0..n_local {
                    cursor.locals.pop();
                }
                cursor.stack.clear();
            }
            FrameKind::Append => {
                cursor.locals.extend(delta_locals.iter().cloned());
                cursor.stack.clear();
            }
            FrameKind::Full | FrameKind::New => {
                cursor.locals = delta_locals.clone();
                cursor.stack = delta_stack.clone();
            }
        }

        cursor.pending = Some(PendingFrame {
            at: cursor.bytecode_offset as u32,
            kind,
            n_local,
            delta_locals,
            n_stack,
            delta_stack,
        });
        Ok(())
    }
}

/// Byte length of a fixed-size instruction.
fn instruction_length(opcode: u8, at: usize) -> Result<usize> {
    Ok(match opcode {
        NOP..=DCONST_1
        | ILOAD_0..=SALOAD
        | ISTORE_0..=SASTORE
        | POP..=SWAP
        | IADD..=LXOR
        | I2L..=DCMPG
        | IRETURN..=RETURN
        | ARRAYLENGTH
        | ATHROW
        | MONITORENTER
        | MONITOREXIT => 1,
        BIPUSH | LDC | ILOAD..=ALOAD | ISTORE..=ASTORE | RET | NEWARRAY => 2,
        SIPUSH | LDC_W | LDC2_W | IINC | GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST
        | INSTANCEOF => 3,
        MULTIANEWARRAY => 4,
        INVOKEINTERFACE | INVOKEDYNAMIC => 5,
        _ => {
            return Err(Error::malformed(
                at,
                format!("unknown opcode {:#x}", opcode),
            ))
        }
    })
}
