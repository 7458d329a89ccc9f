//! Opaque passthrough for attributes this library does not interpret. The
//! payload is carried byte-exact, so unknown attributes survive a
//! read/transform/write round trip unchanged (as long as they contain no
//! constant pool indices, which cannot be relocated blindly).

use crate::bytes::ByteVector;
use crate::error::Result;
use crate::symbol::SymbolTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name as it appears in the class file, e.g. `Scala` or a
    /// tool-specific name.
    pub type_name: String,
    pub content: Vec<u8>,
}

impl Attribute {
    pub fn new(type_name: impl Into<String>, content: Vec<u8>) -> Self {
        Attribute {
            type_name: type_name.into(),
            content,
        }
    }

    pub(crate) fn put(&self, symbols: &mut SymbolTable, out: &mut ByteVector) -> Result<()> {
        let name_index = symbols.add_constant_utf8(&self.type_name)?;
        out.put_u16(name_index);
        out.put_u32(self.content.len() as u32);
        out.put_bytes(&self.content);
        Ok(())
    }
}

/// Serializes a list of attributes with its `u16` count prefix.
pub(crate) fn put_attributes(
    attributes: &[Attribute],
    symbols: &mut SymbolTable,
    out: &mut ByteVector,
) -> Result<()> {
    for attribute in attributes {
        attribute.put(symbols, out)?;
    }
    Ok(())
}
