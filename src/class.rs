//! Top level assembly of a class file. The writer owns the symbol table and
//! a writer per field, method and record component; `to_bytes` concatenates
//! their serialized forms with the constant pool in the order mandated by
//! JVMS §4.1.

use std::cell::RefCell;
use std::rc::Rc;

use crate::annotation::{Annotation, AnnotationSet, TypeAnnotation};
use crate::attribute::Attribute;
use crate::bytes::ByteVector;
use crate::constant::Constant;
use crate::error::Result;
use crate::field::FieldWriter;
use crate::method::{Compute as MethodCompute, MethodWriter};
use crate::module::ModuleWriter;
use crate::opcodes::AccessFlags;
use crate::reader::{ClassReader, ParsingOptions};
use crate::symbol::SymbolTable;
use crate::version::{ClassVersion, V1_5, V1_7};
use crate::visitor::{
    ClassVisitor, FieldVisitor, MethodVisitor, ModuleVisitor, RecordComponentVisitor,
};

/// What the writer computes on behalf of the caller when each method's
/// `visit_maxs` arrives.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Compute {
    /// Emit exactly what was visited, including max_stack/max_locals.
    Nothing,
    /// Compute max_stack and max_locals; visited values are ignored.
    Maxs,
    /// Compute stack map frames and maxs; visited frames are ignored.
    Frames,
}

pub struct ClassWriter {
    symbols: Rc<RefCell<SymbolTable>>,
    compute: Compute,

    version: ClassVersion,
    access: AccessFlags,
    this_class_index: u16,
    super_class_index: u16,
    signature_index: u16,
    interface_indexes: Vec<u16>,

    fields: Vec<FieldWriter>,
    methods: Vec<MethodWriter>,

    source_file_index: u16,
    debug_extension: Option<Vec<u8>>,
    inner_classes: Vec<[u16; 4]>,
    enclosing_class_index: u16,
    enclosing_method_index: u16,
    nest_host_index: u16,
    nest_members: Vec<u16>,
    permitted_subclasses: Vec<u16>,
    module: Option<ModuleWriter>,
    record_components: Vec<RecordComponentWriter>,
    annotations: AnnotationSet,
    attributes: Vec<Attribute>,
}

impl ClassWriter {
    pub fn new(compute: Compute) -> Self {
        ClassWriter {
            symbols: Rc::new(RefCell::new(SymbolTable::new())),
            compute,
            version: crate::version::V1_8,
            access: AccessFlags::empty(),
            this_class_index: 0,
            super_class_index: 0,
            signature_index: 0,
            interface_indexes: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            source_file_index: 0,
            debug_extension: None,
            inner_classes: Vec::new(),
            enclosing_class_index: 0,
            enclosing_method_index: 0,
            nest_host_index: 0,
            nest_members: Vec::new(),
            permitted_subclasses: Vec::new(),
            module: None,
            record_components: Vec::new(),
            annotations: AnnotationSet::default(),
            attributes: Vec::new(),
        }
    }

    /// Builds a writer whose constant pool is seeded with a wholesale copy
    /// of the reader's pool, so transformations that mostly add content do
    /// not pay re-interning costs and unmodified methods can be copied
    /// verbatim.
    pub fn from_reader(reader: &ClassReader, compute: Compute) -> Result<Self> {
        let writer = ClassWriter::new(compute);
        {
            let mut table = writer.symbols.borrow_mut();
            reader.copy_pool(&mut table)?;
            table.set_source(reader.bytes());
        }
        Ok(writer)
    }

    /// Installs the resolver used to merge two unrelated reference types
    /// during frame computation. Without one, unrelated classes merge to
    /// `java/lang/Object`, which is correct only when neither type's real
    /// super chain matters to the verifier; callers with a class path should
    /// provide the precise answer.
    pub fn set_super_class_resolver(
        &mut self,
        resolver: Box<dyn FnMut(&str, &str) -> String>,
    ) {
        self.symbols
            .borrow_mut()
            .set_common_super_resolver(resolver);
    }

    // Direct pool accessors, for callers generating custom attributes.

    pub fn new_utf8(&mut self, value: &str) -> Result<u16> {
        self.symbols.borrow_mut().add_constant_utf8(value)
    }

    pub fn new_class(&mut self, internal_name: &str) -> Result<u16> {
        self.symbols.borrow_mut().add_constant_class(internal_name)
    }

    pub fn new_const(&mut self, value: &Constant) -> Result<u16> {
        self.symbols.borrow_mut().add_constant(value)
    }

    pub fn new_field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        self.symbols
            .borrow_mut()
            .add_constant_fieldref(owner, name, descriptor)
    }

    pub fn new_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<u16> {
        self.symbols
            .borrow_mut()
            .add_constant_methodref(owner, name, descriptor, is_interface)
    }

    pub fn new_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        self.symbols
            .borrow_mut()
            .add_constant_name_and_type(name, descriptor)
    }

    /// Serializes the class. When a method contained a forward branch whose
    /// 16 bit offset overflowed, the first serialization still holds
    /// internal wide-branch opcodes; a reader round trip with branch
    /// expansion then produces the final bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut fields_body = ByteVector::new();
        for field in &self.fields {
            field.put(&mut fields_body)?;
        }
        let mut methods_body = ByteVector::new();
        for method in &self.methods {
            method.put(&mut methods_body)?;
        }
        let class_attributes = self.put_class_attributes()?;

        let mut out = ByteVector::with_capacity(
            256 + fields_body.len() + methods_body.len() + class_attributes.1.len(),
        );
        out.put_u32(0xCAFE_BABE);
        out.put_u16(self.version.minor()).put_u16(self.version.major());
        {
            let table = self.symbols.borrow();
            out.put_u16(table.constant_pool_count());
            out.put_bytes(table.pool_bytes());
        }
        out.put_u16(self.access.file_bits());
        out.put_u16(self.this_class_index);
        out.put_u16(self.super_class_index);
        out.put_u16(self.interface_indexes.len() as u16);
        for index in &self.interface_indexes {
            out.put_u16(*index);
        }
        out.put_u16(self.fields.len() as u16);
        out.put_bytes(fields_body.as_slice());
        out.put_u16(self.methods.len() as u16);
        out.put_bytes(methods_body.as_slice());
        out.put_u16(class_attributes.0);
        out.put_bytes(class_attributes.1.as_slice());

        {
            let table = self.symbols.borrow();
            debug!(
                "serialized {}: {} pool entries, {} fields, {} methods",
                table.class_name(),
                table.constant_pool_count(),
                self.fields.len(),
                self.methods.len()
            );
        }

        if self.methods.iter().any(MethodWriter::has_internal_wide_branches) {
            debug!("expanding oversized branches through a reader round trip");
            let reader = ClassReader::new(out.into_vec())?;
            let mut expanded = ClassWriter::from_reader(&reader, Compute::Nothing)?;
            reader.accept(
                &mut expanded,
                ParsingOptions::EXPAND_FRAMES | ParsingOptions::EXPAND_WIDE_BRANCHES,
            )?;
            return expanded.to_bytes();
        }
        Ok(out.into_vec())
    }

    /// Serializes the class level attributes, returning their count and
    /// bytes. Built before the pool so every attribute name is interned.
    fn put_class_attributes(&self) -> Result<(u16, ByteVector)> {
        let mut table = self.symbols.borrow_mut();
        let mut out = ByteVector::new();
        let mut count = 0u16;
        let use_synthetic_attribute = table.major_version() < V1_5.major();

        if self.signature_index != 0 {
            count += 1;
            out.put_u16(table.add_constant_utf8("Signature")?);
            out.put_u32(2);
            out.put_u16(self.signature_index);
        }
        if self.source_file_index != 0 {
            count += 1;
            out.put_u16(table.add_constant_utf8("SourceFile")?);
            out.put_u32(2);
            out.put_u16(self.source_file_index);
        }
        if let Some(debug_extension) = &self.debug_extension {
            count += 1;
            out.put_u16(table.add_constant_utf8("SourceDebugExtension")?);
            out.put_u32(debug_extension.len() as u32);
            out.put_bytes(debug_extension);
        }
        if !self.inner_classes.is_empty() {
            count += 1;
            out.put_u16(table.add_constant_utf8("InnerClasses")?);
            out.put_u32(2 + 8 * self.inner_classes.len() as u32);
            out.put_u16(self.inner_classes.len() as u16);
            for entry in &self.inner_classes {
                for value in entry {
                    out.put_u16(*value);
                }
            }
        }
        if self.enclosing_class_index != 0 {
            count += 1;
            out.put_u16(table.add_constant_utf8("EnclosingMethod")?);
            out.put_u32(4);
            out.put_u16(self.enclosing_class_index);
            out.put_u16(self.enclosing_method_index);
        }
        if self.nest_host_index != 0 {
            count += 1;
            out.put_u16(table.add_constant_utf8("NestHost")?);
            out.put_u32(2);
            out.put_u16(self.nest_host_index);
        }
        if !self.nest_members.is_empty() {
            count += 1;
            out.put_u16(table.add_constant_utf8("NestMembers")?);
            out.put_u32(2 + 2 * self.nest_members.len() as u32);
            out.put_u16(self.nest_members.len() as u16);
            for member in &self.nest_members {
                out.put_u16(*member);
            }
        }
        if !self.permitted_subclasses.is_empty() {
            count += 1;
            out.put_u16(table.add_constant_utf8("PermittedSubclasses")?);
            out.put_u32(2 + 2 * self.permitted_subclasses.len() as u32);
            out.put_u16(self.permitted_subclasses.len() as u16);
            for subclass in &self.permitted_subclasses {
                out.put_u16(*subclass);
            }
        }
        if !self.record_components.is_empty() {
            count += 1;
            let mut body = ByteVector::new();
            body.put_u16(self.record_components.len() as u16);
            for component in &self.record_components {
                component.put(&mut table, &mut body)?;
            }
            out.put_u16(table.add_constant_utf8("Record")?);
            out.put_u32(body.len() as u32);
            out.put_bytes(body.as_slice());
        }
        if self.access.contains(AccessFlags::SYNTHETIC) && use_synthetic_attribute {
            count += 1;
            out.put_u16(table.add_constant_utf8("Synthetic")?);
            out.put_u32(0);
        }
        if self.access.contains(AccessFlags::DEPRECATED) {
            count += 1;
            out.put_u16(table.add_constant_utf8("Deprecated")?);
            out.put_u32(0);
        }
        count += self.annotations.attribute_count();
        self.annotations.put(&mut table, &mut out)?;
        for attribute in &self.attributes {
            count += 1;
            attribute.put(&mut table, &mut out)?;
        }
        drop(table);

        if let Some(module) = &self.module {
            count += module.attribute_count();
            module.put(&mut out)?;
        }

        // BootstrapMethods last: methods and attributes built above may have
        // appended entries.
        let mut table = self.symbols.borrow_mut();
        if table.bootstrap_method_count() > 0 {
            count += 1;
            let name_index = table.add_constant_utf8("BootstrapMethods")?;
            out.put_u16(name_index);
            out.put_u32(2 + table.bootstrap_bytes().len() as u32);
            out.put_u16(table.bootstrap_method_count());
            out.put_bytes(table.bootstrap_bytes());
        }
        Ok((count, out))
    }
}

impl ClassVisitor for ClassWriter {
    fn visit(
        &mut self,
        version: ClassVersion,
        access: AccessFlags,
        name: &str,
        signature: Option<&str>,
        super_name: Option<&str>,
        interfaces: &[&str],
    ) -> Result<()> {
        self.version = version;
        self.access = access;
        let mut table = self.symbols.borrow_mut();
        table.set_class_info(name, version.major());
        self.this_class_index = table.add_constant_class(name)?;
        self.super_class_index = match super_name {
            Some(super_name) => table.add_constant_class(super_name)?,
            None => 0,
        };
        self.signature_index = match signature {
            Some(signature) => table.add_constant_utf8(signature)?,
            None => 0,
        };
        self.interface_indexes.clear();
        for interface in interfaces {
            self.interface_indexes.push(table.add_constant_class(interface)?);
        }
        Ok(())
    }

    fn visit_source(&mut self, file: Option<&str>, debug: Option<&str>) -> Result<()> {
        let mut table = self.symbols.borrow_mut();
        if let Some(file) = file {
            self.source_file_index = table.add_constant_utf8(file)?;
        }
        if let Some(debug) = debug {
            self.debug_extension = Some(cesu8::to_java_cesu8(debug).into_owned());
        }
        Ok(())
    }

    fn visit_module(
        &mut self,
        name: &str,
        access: AccessFlags,
        version: Option<&str>,
    ) -> Result<Option<&mut dyn ModuleVisitor>> {
        let writer = ModuleWriter::new(self.symbols.clone(), name, access, version)?;
        self.module = Some(writer);
        Ok(Some(self.module.as_mut().unwrap() as &mut dyn ModuleVisitor))
    }

    fn visit_nest_host(&mut self, nest_host: &str) -> Result<()> {
        self.nest_host_index = self.symbols.borrow_mut().add_constant_class(nest_host)?;
        Ok(())
    }

    fn visit_outer_class(
        &mut self,
        owner: &str,
        method_name: Option<&str>,
        method_descriptor: Option<&str>,
    ) -> Result<()> {
        let mut table = self.symbols.borrow_mut();
        self.enclosing_class_index = table.add_constant_class(owner)?;
        if let (Some(name), Some(descriptor)) = (method_name, method_descriptor) {
            self.enclosing_method_index = table.add_constant_name_and_type(name, descriptor)?;
        }
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

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.attributes.push(attribute.clone());
        Ok(())
    }

    fn visit_nest_member(&mut self, nest_member: &str) -> Result<()> {
        let index = self.symbols.borrow_mut().add_constant_class(nest_member)?;
        self.nest_members.push(index);
        Ok(())
    }

    fn visit_permitted_subclass(&mut self, permitted_subclass: &str) -> Result<()> {
        let index = self
            .symbols
            .borrow_mut()
            .add_constant_class(permitted_subclass)?;
        self.permitted_subclasses.push(index);
        Ok(())
    }

    fn visit_inner_class(
        &mut self,
        name: &str,
        outer_name: Option<&str>,
        inner_name: Option<&str>,
        access: AccessFlags,
    ) -> Result<()> {
        let mut table = self.symbols.borrow_mut();
        let entry = [
            table.add_constant_class(name)?,
            match outer_name {
                Some(outer) => table.add_constant_class(outer)?,
                None => 0,
            },
            match inner_name {
                Some(inner) => table.add_constant_utf8(inner)?,
                None => 0,
            },
            access.file_bits(),
        ];
        drop(table);
        if !self.inner_classes.contains(&entry) {
            self.inner_classes.push(entry);
        }
        Ok(())
    }

    fn visit_record_component(
        &mut self,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
    ) -> Result<Option<&mut dyn RecordComponentVisitor>> {
        let writer = RecordComponentWriter::new(&self.symbols, name, descriptor, signature)?;
        self.record_components.push(writer);
        Ok(Some(
            self.record_components.last_mut().unwrap() as &mut dyn RecordComponentVisitor
        ))
    }

    fn visit_field(
        &mut self,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        value: Option<&Constant>,
    ) -> Result<Option<&mut dyn FieldVisitor>> {
        let writer = FieldWriter::new(
            self.symbols.clone(),
            access,
            name,
            descriptor,
            signature,
            value,
        )?;
        self.fields.push(writer);
        Ok(Some(self.fields.last_mut().unwrap() as &mut dyn FieldVisitor))
    }

    fn visit_method(
        &mut self,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        exceptions: &[&str],
    ) -> Result<Option<&mut dyn MethodVisitor>> {
        let compute = match self.compute {
            Compute::Frames => MethodCompute::AllFrames,
            Compute::Maxs => {
                if self.version >= V1_7 {
                    MethodCompute::MaxStackAndLocalFromFrames
                } else {
                    MethodCompute::MaxStackAndLocal
                }
            }
            Compute::Nothing => MethodCompute::Nothing,
        };
        let writer = MethodWriter::new(
            self.symbols.clone(),
            access,
            name,
            descriptor,
            signature,
            exceptions,
            compute,
        )?;
        self.methods.push(writer);
        Ok(Some(self.methods.last_mut().unwrap() as &mut dyn MethodVisitor))
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Assembles one `record_component_info` structure.
pub struct RecordComponentWriter {
    name_index: u16,
    descriptor_index: u16,
    signature_index: u16,
    annotations: AnnotationSet,
    attributes: Vec<Attribute>,
}

impl RecordComponentWriter {
    fn new(
        symbols: &Rc<RefCell<SymbolTable>>,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
    ) -> Result<Self> {
        let (name_index, descriptor_index, signature_index) = {
            let mut table = symbols.borrow_mut();
            let name_index = table.add_constant_utf8(name)?;
            let descriptor_index = table.add_constant_utf8(descriptor)?;
            let signature_index = match signature {
                Some(signature) => table.add_constant_utf8(signature)?,
                None => 0,
            };
            (name_index, descriptor_index, signature_index)
        };
        Ok(RecordComponentWriter {
            name_index,
            descriptor_index,
            signature_index,
            annotations: AnnotationSet::default(),
            attributes: Vec::new(),
        })
    }

    fn put(&self, table: &mut SymbolTable, out: &mut ByteVector) -> Result<()> {
        out.put_u16(self.name_index);
        out.put_u16(self.descriptor_index);
        let mut attribute_count = self.annotations.attribute_count();
        if self.signature_index != 0 {
            attribute_count += 1;
        }
        attribute_count += self.attributes.len() as u16;
        out.put_u16(attribute_count);
        if self.signature_index != 0 {
            out.put_u16(table.add_constant_utf8("Signature")?);
            out.put_u32(2);
            out.put_u16(self.signature_index);
        }
        self.annotations.put(table, out)?;
        crate::attribute::put_attributes(&self.attributes, table, out)?;
        Ok(())
    }
}

impl RecordComponentVisitor for RecordComponentWriter {
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

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.attributes.push(attribute.clone());
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}
