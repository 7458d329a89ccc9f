//! Assembles one `field_info` structure from visitor events.

use std::cell::RefCell;
use std::rc::Rc;

use crate::annotation::{Annotation, AnnotationSet, TypeAnnotation};
use crate::attribute::Attribute;
use crate::bytes::ByteVector;
use crate::constant::Constant;
use crate::error::Result;
use crate::opcodes::AccessFlags;
use crate::symbol::SymbolTable;
use crate::version::V1_5;
use crate::visitor::FieldVisitor;

pub struct FieldWriter {
    symbols: Rc<RefCell<SymbolTable>>,
    access: AccessFlags,
    name_index: u16,
    descriptor_index: u16,
    signature_index: u16,
    constant_value_index: u16,
    annotations: AnnotationSet,
    attributes: Vec<Attribute>,
}

impl FieldWriter {
    pub(crate) fn new(
        symbols: Rc<RefCell<SymbolTable>>,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        value: Option<&Constant>,
    ) -> Result<Self> {
        let (name_index, descriptor_index, signature_index, constant_value_index) = {
            let mut table = symbols.borrow_mut();
            let name_index = table.add_constant_utf8(name)?;
            let descriptor_index = table.add_constant_utf8(descriptor)?;
            let signature_index = match signature {
                Some(signature) => table.add_constant_utf8(signature)?,
                None => 0,
            };
            let constant_value_index = match value {
                Some(value) => table.add_constant(value)?,
                None => 0,
            };
            (name_index, descriptor_index, signature_index, constant_value_index)
        };
        Ok(FieldWriter {
            symbols,
            access,
            name_index,
            descriptor_index,
            signature_index,
            constant_value_index,
            annotations: AnnotationSet::default(),
            attributes: Vec::new(),
        })
    }

    pub(crate) fn put(&self, out: &mut ByteVector) -> Result<()> {
        let mut table = self.symbols.borrow_mut();
        // The Synthetic attribute is only required before version 49; later
        // versions use the access bit alone.
        let use_synthetic_attribute = table.major_version() < V1_5.major();

        out.put_u16(self.access.file_bits());
        out.put_u16(self.name_index);
        out.put_u16(self.descriptor_index);

        let mut attribute_count = self.annotations.attribute_count();
        if self.constant_value_index != 0 {
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
        attribute_count += self.attributes.len() as u16;
        out.put_u16(attribute_count);

        if self.constant_value_index != 0 {
            out.put_u16(table.add_constant_utf8("ConstantValue")?);
            out.put_u32(2);
            out.put_u16(self.constant_value_index);
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
        self.annotations.put(&mut table, out)?;
        crate::attribute::put_attributes(&self.attributes, &mut table, out)?;
        Ok(())
    }
}

impl FieldVisitor for FieldWriter {
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
