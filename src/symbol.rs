//! The deduplicating symbol table behind a class writer: the constant pool,
//! the `BootstrapMethods` attribute, and the auxiliary type table used by
//! frame computation. The table owns both the serialized bytes of each store
//! and a hash set over them; the two views grow in lockstep and entries are
//! never removed once committed.

use std::rc::Rc;

use num_traits::ToPrimitive;

use crate::bytes::ByteVector;
use crate::constant::{Constant, ConstantDynamic, Handle};
use crate::error::{Error, Result};

// Tag values for the constant pool entries (same order as the JVMS).
pub(crate) const CONSTANT_UTF8_TAG: u8 = 1;
pub(crate) const CONSTANT_INTEGER_TAG: u8 = 3;
pub(crate) const CONSTANT_FLOAT_TAG: u8 = 4;
pub(crate) const CONSTANT_LONG_TAG: u8 = 5;
pub(crate) const CONSTANT_DOUBLE_TAG: u8 = 6;
pub(crate) const CONSTANT_CLASS_TAG: u8 = 7;
pub(crate) const CONSTANT_STRING_TAG: u8 = 8;
pub(crate) const CONSTANT_FIELDREF_TAG: u8 = 9;
pub(crate) const CONSTANT_METHODREF_TAG: u8 = 10;
pub(crate) const CONSTANT_INTERFACE_METHODREF_TAG: u8 = 11;
pub(crate) const CONSTANT_NAME_AND_TYPE_TAG: u8 = 12;
pub(crate) const CONSTANT_METHOD_HANDLE_TAG: u8 = 15;
pub(crate) const CONSTANT_METHOD_TYPE_TAG: u8 = 16;
pub(crate) const CONSTANT_DYNAMIC_TAG: u8 = 17;
pub(crate) const CONSTANT_INVOKE_DYNAMIC_TAG: u8 = 18;
pub(crate) const CONSTANT_MODULE_TAG: u8 = 19;
pub(crate) const CONSTANT_PACKAGE_TAG: u8 = 20;

// Tag values for entries that do not live in the constant pool: the
// BootstrapMethods attribute and the type table.
pub(crate) const BOOTSTRAP_METHOD_TAG: u8 = 64;
pub(crate) const TYPE_TAG: u8 = 128;
pub(crate) const UNINITIALIZED_TYPE_TAG: u8 = 129;
pub(crate) const MERGED_TYPE_TAG: u8 = 130;

/// An entry of the symbol table. `index` is the constant pool index for pool
/// resident tags, the `BootstrapMethods` array index for bootstrap entries,
/// and the type table index for type entries. `data` is a tag-dependent
/// numeric payload: the raw bit pattern of numeric constants, the reference
/// kind of a method handle, the bootstrap method index of a dynamic constant,
/// the bytecode offset of an uninitialized type, or the packed index pair of
/// a merged type.
#[derive(Debug, Clone)]
pub(crate) struct Symbol {
    pub index: u32,
    pub tag: u8,
    pub owner: Option<String>,
    pub name: Option<String>,
    pub value: Option<String>,
    pub data: u64,
    /// Memoized, tag-dependent extra value; for merged types the type table
    /// index of the computed common super class.
    pub info: u32,
}

impl Symbol {
    fn new(index: u32, tag: u8) -> Self {
        Symbol {
            index,
            tag,
            owner: None,
            name: None,
            value: None,
            data: 0,
            info: 0,
        }
    }
}

struct Entry {
    symbol: Symbol,
    hash: u32,
    /// Arena index of the next entry in the same bucket.
    next: u32,
}

const NO_ENTRY: u32 = u32::MAX;

fn str_hash(s: &str) -> u32 {
    s.bytes()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32))
}

fn opt_hash(s: &Option<String>) -> u32 {
    s.as_deref().map(str_hash).unwrap_or(0)
}

/// 31-bit non-negative hash over a symbol's tag and semantic key. Seeded and
/// freshly added entries go through this one function so they always collide
/// when equal.
fn symbol_hash(symbol: &Symbol) -> u32 {
    let tag = symbol.tag as u32;
    let h = match symbol.tag {
        CONSTANT_UTF8_TAG
        | CONSTANT_CLASS_TAG
        | CONSTANT_STRING_TAG
        | CONSTANT_METHOD_TYPE_TAG
        | CONSTANT_MODULE_TAG
        | CONSTANT_PACKAGE_TAG
        | TYPE_TAG => tag.wrapping_add(opt_hash(&symbol.value)),
        CONSTANT_INTEGER_TAG | CONSTANT_FLOAT_TAG => tag.wrapping_add(symbol.data as u32),
        CONSTANT_LONG_TAG | CONSTANT_DOUBLE_TAG => {
            tag.wrapping_add((symbol.data ^ (symbol.data >> 32)) as u32)
        }
        CONSTANT_NAME_AND_TYPE_TAG => {
            tag.wrapping_add(opt_hash(&symbol.name).wrapping_mul(opt_hash(&symbol.value)))
        }
        CONSTANT_FIELDREF_TAG | CONSTANT_METHODREF_TAG | CONSTANT_INTERFACE_METHODREF_TAG => tag
            .wrapping_add(
                opt_hash(&symbol.owner)
                    .wrapping_mul(opt_hash(&symbol.name))
                    .wrapping_mul(opt_hash(&symbol.value)),
            ),
        CONSTANT_METHOD_HANDLE_TAG => tag
            .wrapping_add(symbol.data as u32)
            .wrapping_add(
                opt_hash(&symbol.owner)
                    .wrapping_mul(opt_hash(&symbol.name))
                    .wrapping_mul(opt_hash(&symbol.value)),
            ),
        CONSTANT_DYNAMIC_TAG | CONSTANT_INVOKE_DYNAMIC_TAG => tag
            .wrapping_add(symbol.data as u32)
            .wrapping_add(opt_hash(&symbol.name).wrapping_mul(opt_hash(&symbol.value))),
        UNINITIALIZED_TYPE_TAG => {
            tag.wrapping_add(symbol.data as u32)
                .wrapping_add(opt_hash(&symbol.value))
        }
        MERGED_TYPE_TAG => {
            tag.wrapping_add((symbol.data as u32).wrapping_add((symbol.data >> 32) as u32))
        }
        BOOTSTRAP_METHOD_TAG => unreachable!("bootstrap entries hash over their bytes"),
        _ => tag,
    };
    h & 0x7FFF_FFFF
}

fn bytes_hash(tag: u8, bytes: &[u8]) -> u32 {
    let h = bytes
        .iter()
        .fold(tag as u32, |h, b| h.wrapping_mul(31).wrapping_add(*b as u32));
    h & 0x7FFF_FFFF
}

fn symbol_key_eq(a: &Symbol, b: &Symbol) -> bool {
    a.tag == b.tag
        && a.data == b.data
        && a.owner == b.owner
        && a.name == b.name
        && a.value == b.value
}

/// Deduplicated constant pool, bootstrap methods and type table of a class
/// being written.
pub struct SymbolTable {
    class_name: String,
    major_version: u16,

    /// Insertion-ordered entry arena. Bucket chains run through `Entry::next`.
    entries: Vec<Entry>,
    /// Bucket heads, indexed by `hash % buckets.len()`.
    buckets: Vec<u32>,

    /// Serialized constant pool body, in index order.
    constant_pool: ByteVector,
    /// Next free constant pool index; the value written as the pool count.
    constant_pool_count: u32,

    /// Serialized entries of the BootstrapMethods attribute.
    bootstrap_methods: ByteVector,
    bootstrap_method_count: u16,

    /// Arena indices of type table entries, in type index order.
    type_table: Vec<u32>,

    /// Resolver used to merge two unrelated reference types; `None` falls
    /// back to `java/lang/Object`.
    common_super: Option<Box<dyn FnMut(&str, &str) -> String>>,

    /// Raw bytes of the class this table was seeded from, when built for a
    /// read/transform/write pipeline.
    source: Option<Rc<Vec<u8>>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            class_name: String::new(),
            major_version: 0,
            entries: Vec::new(),
            buckets: vec![NO_ENTRY; 16],
            constant_pool: ByteVector::with_capacity(256),
            constant_pool_count: 1,
            bootstrap_methods: ByteVector::new(),
            bootstrap_method_count: 0,
            type_table: Vec::new(),
            common_super: None,
            source: None,
        }
    }

    pub(crate) fn set_class_info(&mut self, name: &str, major_version: u16) {
        self.class_name = name.to_owned();
        self.major_version = major_version;
    }

    pub(crate) fn class_name(&self) -> &str {
        &self.class_name
    }

    pub(crate) fn major_version(&self) -> u16 {
        self.major_version
    }

    pub(crate) fn set_common_super_resolver(
        &mut self,
        resolver: Box<dyn FnMut(&str, &str) -> String>,
    ) {
        self.common_super = Some(resolver);
    }

    pub(crate) fn set_source(&mut self, source: Rc<Vec<u8>>) {
        self.source = Some(source);
    }

    pub(crate) fn source_id(&self) -> Option<usize> {
        self.source.as_ref().map(|rc| Rc::as_ptr(rc) as usize)
    }

    pub(crate) fn source_bytes(&self) -> Option<&Rc<Vec<u8>>> {
        self.source.as_ref()
    }

    /// Number the pool count field of the class file will hold.
    pub fn constant_pool_count(&self) -> u16 {
        self.constant_pool_count as u16
    }

    pub(crate) fn pool_bytes(&self) -> &[u8] {
        self.constant_pool.as_slice()
    }

    pub(crate) fn bootstrap_method_count(&self) -> u16 {
        self.bootstrap_method_count
    }

    pub(crate) fn bootstrap_bytes(&self) -> &[u8] {
        self.bootstrap_methods.as_slice()
    }

    // ------------------------------------------------------------------
    // Hash set plumbing
    // ------------------------------------------------------------------

    fn find(&self, hash: u32, candidate: &Symbol) -> Option<&Symbol> {
        let mut at = self.buckets[(hash as usize) % self.buckets.len()];
        while at != NO_ENTRY {
            let entry = &self.entries[at as usize];
            if entry.hash == hash && symbol_key_eq(&entry.symbol, candidate) {
                return Some(&entry.symbol);
            }
            at = entry.next;
        }
        None
    }

    /// Commits `symbol` into the hash set. Grows the bucket array to double
    /// plus one when the load factor passes 3/4; rehashing walks the arena in
    /// reverse so every bucket keeps its most-recently-added-first order.
    fn put(&mut self, symbol: Symbol, hash: u32) -> u32 {
        if self.entries.len() + 1 > self.buckets.len() * 3 / 4 {
            let new_capacity = self.buckets.len() * 2 + 1;
            self.buckets = vec![NO_ENTRY; new_capacity];
            for at in (0..self.entries.len()).rev() {
                let bucket = (self.entries[at].hash as usize) % new_capacity;
                self.entries[at].next = self.buckets[bucket];
                self.buckets[bucket] = at as u32;
            }
        }

        let at = self.entries.len() as u32;
        let bucket = (hash as usize) % self.buckets.len();
        self.entries.push(Entry {
            symbol,
            hash,
            next: self.buckets[bucket],
        });
        self.buckets[bucket] = at;
        at
    }

    fn new_pool_index(&mut self, slots: u32) -> Result<u16> {
        if self.constant_pool_count + slots > 0xFFFF {
            return Err(Error::ClassTooLarge {
                class: self.class_name.clone(),
                constant_pool_count: (self.constant_pool_count + slots) as usize,
            });
        }
        let index = self.constant_pool_count as u16;
        self.constant_pool_count += slots;
        Ok(index)
    }

    // ------------------------------------------------------------------
    // Constant pool adders. Each one returns the index of the existing
    // entry when the semantic key is already interned.
    // ------------------------------------------------------------------

    pub fn add_constant_utf8(&mut self, value: &str) -> Result<u16> {
        let mut candidate = Symbol::new(0, CONSTANT_UTF8_TAG);
        candidate.value = Some(value.to_owned());
        let hash = symbol_hash(&candidate);
        if let Some(found) = self.find(hash, &candidate) {
            return Ok(found.index as u16);
        }
        let index = self.new_pool_index(1)?;
        self.constant_pool.put_u8(CONSTANT_UTF8_TAG);
        self.constant_pool.put_utf8(value)?;
        candidate.index = index as u32;
        self.put(candidate, hash);
        Ok(index)
    }

    pub fn add_constant_integer(&mut self, value: i32) -> Result<u16> {
        self.add_constant_32(CONSTANT_INTEGER_TAG, value as u32)
    }

    pub fn add_constant_float(&mut self, value: f32) -> Result<u16> {
        self.add_constant_32(CONSTANT_FLOAT_TAG, value.to_bits())
    }

    fn add_constant_32(&mut self, tag: u8, bits: u32) -> Result<u16> {
        let mut candidate = Symbol::new(0, tag);
        candidate.data = bits as u64;
        let hash = symbol_hash(&candidate);
        if let Some(found) = self.find(hash, &candidate) {
            return Ok(found.index as u16);
        }
        let index = self.new_pool_index(1)?;
        self.constant_pool.put_u8(tag).put_u32(bits);
        candidate.index = index as u32;
        self.put(candidate, hash);
        Ok(index)
    }

    pub fn add_constant_long(&mut self, value: i64) -> Result<u16> {
        self.add_constant_64(CONSTANT_LONG_TAG, value as u64)
    }

    pub fn add_constant_double(&mut self, value: f64) -> Result<u16> {
        self.add_constant_64(CONSTANT_DOUBLE_TAG, value.to_bits())
    }

    /// Long and double entries reserve two consecutive indices; the second
    /// one is never referenced.
    fn add_constant_64(&mut self, tag: u8, bits: u64) -> Result<u16> {
        let mut candidate = Symbol::new(0, tag);
        candidate.data = bits;
        let hash = symbol_hash(&candidate);
        if let Some(found) = self.find(hash, &candidate) {
            return Ok(found.index as u16);
        }
        let index = self.new_pool_index(2)?;
        self.constant_pool.put_u8(tag).put_u64(bits);
        candidate.index = index as u32;
        self.put(candidate, hash);
        Ok(index)
    }

    pub fn add_constant_class(&mut self, internal_name: &str) -> Result<u16> {
        self.add_utf8_reference(CONSTANT_CLASS_TAG, internal_name)
    }

    pub fn add_constant_string(&mut self, value: &str) -> Result<u16> {
        self.add_utf8_reference(CONSTANT_STRING_TAG, value)
    }

    pub fn add_constant_method_type(&mut self, method_descriptor: &str) -> Result<u16> {
        self.add_utf8_reference(CONSTANT_METHOD_TYPE_TAG, method_descriptor)
    }

    pub fn add_constant_module(&mut self, module_name: &str) -> Result<u16> {
        self.add_utf8_reference(CONSTANT_MODULE_TAG, module_name)
    }

    pub fn add_constant_package(&mut self, package_name: &str) -> Result<u16> {
        self.add_utf8_reference(CONSTANT_PACKAGE_TAG, package_name)
    }

    /// The five pool entry kinds whose payload is a single utf8 index.
    fn add_utf8_reference(&mut self, tag: u8, value: &str) -> Result<u16> {
        let mut candidate = Symbol::new(0, tag);
        candidate.value = Some(value.to_owned());
        let hash = symbol_hash(&candidate);
        if let Some(found) = self.find(hash, &candidate) {
            return Ok(found.index as u16);
        }
        let utf8_index = self.add_constant_utf8(value)?;
        let index = self.new_pool_index(1)?;
        self.constant_pool.put_u8_u16(tag, utf8_index);
        candidate.index = index as u32;
        self.put(candidate, hash);
        Ok(index)
    }

    pub fn add_constant_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let mut candidate = Symbol::new(0, CONSTANT_NAME_AND_TYPE_TAG);
        candidate.name = Some(name.to_owned());
        candidate.value = Some(descriptor.to_owned());
        let hash = symbol_hash(&candidate);
        if let Some(found) = self.find(hash, &candidate) {
            return Ok(found.index as u16);
        }
        let name_index = self.add_constant_utf8(name)?;
        let descriptor_index = self.add_constant_utf8(descriptor)?;
        let index = self.new_pool_index(1)?;
        self.constant_pool
            .put_u8(CONSTANT_NAME_AND_TYPE_TAG)
            .put_u16(name_index)
            .put_u16(descriptor_index);
        candidate.index = index as u32;
        self.put(candidate, hash);
        Ok(index)
    }

    pub fn add_constant_fieldref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16> {
        self.add_member_reference(CONSTANT_FIELDREF_TAG, owner, name, descriptor)
    }

    pub fn add_constant_methodref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<u16> {
        let tag = if is_interface {
            CONSTANT_INTERFACE_METHODREF_TAG
        } else {
            CONSTANT_METHODREF_TAG
        };
        self.add_member_reference(tag, owner, name, descriptor)
    }

    fn add_member_reference(
        &mut self,
        tag: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16> {
        let mut candidate = Symbol::new(0, tag);
        candidate.owner = Some(owner.to_owned());
        candidate.name = Some(name.to_owned());
        candidate.value = Some(descriptor.to_owned());
        let hash = symbol_hash(&candidate);
        if let Some(found) = self.find(hash, &candidate) {
            return Ok(found.index as u16);
        }
        let class_index = self.add_constant_class(owner)?;
        let name_and_type_index = self.add_constant_name_and_type(name, descriptor)?;
        let index = self.new_pool_index(1)?;
        self.constant_pool
            .put_u8(tag)
            .put_u16(class_index)
            .put_u16(name_and_type_index);
        candidate.index = index as u32;
        self.put(candidate, hash);
        Ok(index)
    }

    pub fn add_constant_method_handle(&mut self, handle: &Handle) -> Result<u16> {
        let kind = handle.kind.to_u8().expect("reference kind fits in a byte");
        let mut candidate = Symbol::new(0, CONSTANT_METHOD_HANDLE_TAG);
        candidate.owner = Some(handle.owner.clone());
        candidate.name = Some(handle.name.clone());
        candidate.value = Some(handle.descriptor.clone());
        candidate.data = kind as u64;
        let hash = symbol_hash(&candidate);
        if let Some(found) = self.find(hash, &candidate) {
            return Ok(found.index as u16);
        }
        // Kinds 1..4 reference a field, 5..9 a method.
        let reference_index = if handle.kind.is_field() {
            self.add_constant_fieldref(&handle.owner, &handle.name, &handle.descriptor)?
        } else {
            self.add_constant_methodref(
                &handle.owner,
                &handle.name,
                &handle.descriptor,
                handle.is_interface,
            )?
        };
        let index = self.new_pool_index(1)?;
        self.constant_pool
            .put_u8(CONSTANT_METHOD_HANDLE_TAG)
            .put_u8(kind)
            .put_u16(reference_index);
        candidate.index = index as u32;
        self.put(candidate, hash);
        Ok(index)
    }

    pub fn add_constant_dynamic(&mut self, constant: &ConstantDynamic) -> Result<u16> {
        self.add_dynamic_reference(
            CONSTANT_DYNAMIC_TAG,
            &constant.name,
            &constant.descriptor,
            &constant.bootstrap_method,
            &constant.bootstrap_arguments,
        )
    }

    pub fn add_constant_invoke_dynamic(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: &Handle,
        bootstrap_arguments: &[Constant],
    ) -> Result<u16> {
        self.add_dynamic_reference(
            CONSTANT_INVOKE_DYNAMIC_TAG,
            name,
            descriptor,
            bootstrap_method,
            bootstrap_arguments,
        )
    }

    /// The bootstrap method is interned first (its arguments may themselves
    /// add dynamic constants, which must not interleave with the parent pool
    /// entry).
    fn add_dynamic_reference(
        &mut self,
        tag: u8,
        name: &str,
        descriptor: &str,
        bootstrap_method: &Handle,
        bootstrap_arguments: &[Constant],
    ) -> Result<u16> {
        let bootstrap_method_index =
            self.add_bootstrap_method(bootstrap_method, bootstrap_arguments)?;
        let mut candidate = Symbol::new(0, tag);
        candidate.name = Some(name.to_owned());
        candidate.value = Some(descriptor.to_owned());
        candidate.data = bootstrap_method_index as u64;
        let hash = symbol_hash(&candidate);
        if let Some(found) = self.find(hash, &candidate) {
            return Ok(found.index as u16);
        }
        let name_and_type_index = self.add_constant_name_and_type(name, descriptor)?;
        let index = self.new_pool_index(1)?;
        self.constant_pool
            .put_u8(tag)
            .put_u16(bootstrap_method_index)
            .put_u16(name_and_type_index);
        candidate.index = index as u32;
        self.put(candidate, hash);
        Ok(index)
    }

    /// Interns a loadable constant, dispatching on its kind.
    pub fn add_constant(&mut self, constant: &Constant) -> Result<u16> {
        match constant {
            Constant::Integer(value) => self.add_constant_integer(*value),
            Constant::Float(value) => self.add_constant_float(*value),
            Constant::Long(value) => self.add_constant_long(*value),
            Constant::Double(value) => self.add_constant_double(*value),
            Constant::String(value) => self.add_constant_string(value),
            Constant::Class(name) => self.add_constant_class(name),
            Constant::MethodType(descriptor) => self.add_constant_method_type(descriptor),
            Constant::MethodHandle(handle) => self.add_constant_method_handle(handle),
            Constant::Dynamic(dynamic) => self.add_constant_dynamic(dynamic),
        }
    }

    // ------------------------------------------------------------------
    // Bootstrap methods
    // ------------------------------------------------------------------

    /// Interns a `(method_handle, arguments)` pair in the BootstrapMethods
    /// attribute. The entry is serialized speculatively at the tail of the
    /// attribute buffer and compared byte-for-byte against existing entries;
    /// on a hit the trailer is truncated away again. Argument constants are
    /// resolved before the speculative append so recursive dynamic constants
    /// never mutate the buffer mid-entry.
    pub fn add_bootstrap_method(
        &mut self,
        bootstrap_method: &Handle,
        bootstrap_arguments: &[Constant],
    ) -> Result<u16> {
        let handle_index = self.add_constant_method_handle(bootstrap_method)?;
        let mut argument_indices = Vec::with_capacity(bootstrap_arguments.len());
        for argument in bootstrap_arguments {
            argument_indices.push(self.add_constant(argument)?);
        }

        let offset = self.bootstrap_methods.len();
        self.bootstrap_methods.put_u16(handle_index);
        self.bootstrap_methods.put_u16(argument_indices.len() as u16);
        for argument_index in argument_indices {
            self.bootstrap_methods.put_u16(argument_index);
        }
        let length = self.bootstrap_methods.len() - offset;

        let hash = bytes_hash(
            BOOTSTRAP_METHOD_TAG,
            &self.bootstrap_methods.as_slice()[offset..],
        );
        let mut at = self.buckets[(hash as usize) % self.buckets.len()];
        while at != NO_ENTRY {
            let entry = &self.entries[at as usize];
            if entry.hash == hash && entry.symbol.tag == BOOTSTRAP_METHOD_TAG {
                let existing_offset = entry.symbol.data as usize;
                let existing_length = (entry.symbol.data >> 32) as usize;
                let bytes = self.bootstrap_methods.as_slice();
                if existing_length == length
                    && bytes[existing_offset..existing_offset + existing_length]
                        == bytes[offset..offset + length]
                {
                    let index = entry.symbol.index as u16;
                    self.bootstrap_methods.truncate(offset);
                    return Ok(index);
                }
            }
            at = entry.next;
        }

        let mut symbol = Symbol::new(self.bootstrap_method_count as u32, BOOTSTRAP_METHOD_TAG);
        symbol.data = offset as u64 | ((length as u64) << 32);
        let index = self.bootstrap_method_count;
        self.bootstrap_method_count += 1;
        self.put(symbol, hash);
        Ok(index)
    }

    // ------------------------------------------------------------------
    // Type table
    // ------------------------------------------------------------------

    /// Interns an internal class name in the type table and returns its type
    /// index.
    pub(crate) fn add_type(&mut self, internal_name: &str) -> u32 {
        let mut candidate = Symbol::new(0, TYPE_TAG);
        candidate.value = Some(internal_name.to_owned());
        let hash = symbol_hash(&candidate);
        if let Some(found) = self.find(hash, &candidate) {
            return found.index;
        }
        candidate.index = self.type_table.len() as u32;
        let index = candidate.index;
        let at = self.put(candidate, hash);
        self.type_table.push(at);
        index
    }

    /// Interns an uninitialized type: a class name plus the bytecode offset
    /// of the `new` instruction that created it.
    pub(crate) fn add_uninitialized_type(&mut self, internal_name: &str, offset: u32) -> u32 {
        let mut candidate = Symbol::new(0, UNINITIALIZED_TYPE_TAG);
        candidate.value = Some(internal_name.to_owned());
        candidate.data = offset as u64;
        let hash = symbol_hash(&candidate);
        if let Some(found) = self.find(hash, &candidate) {
            return found.index;
        }
        candidate.index = self.type_table.len() as u32;
        let index = candidate.index;
        let at = self.put(candidate, hash);
        self.type_table.push(at);
        index
    }

    /// Interns the merge of two (distinct) normal type indices and returns
    /// the type index of their common super class. The pair is normalized so
    /// argument order cannot produce two entries, and the computed result is
    /// memoized in the entry.
    pub(crate) fn add_merged_type(&mut self, type_index1: u32, type_index2: u32) -> u32 {
        let (low, high) = if type_index1 <= type_index2 {
            (type_index1, type_index2)
        } else {
            (type_index2, type_index1)
        };
        let mut candidate = Symbol::new(0, MERGED_TYPE_TAG);
        candidate.data = low as u64 | ((high as u64) << 32);
        let hash = symbol_hash(&candidate);
        if let Some(found) = self.find(hash, &candidate) {
            return found.info;
        }
        let name1 = self.type_name(low).to_owned();
        let name2 = self.type_name(high).to_owned();
        let merged_name = match &mut self.common_super {
            Some(resolver) => resolver(&name1, &name2),
            None => "java/lang/Object".to_owned(),
        };
        let merged_index = self.add_type(&merged_name);
        candidate.info = merged_index;
        self.put(candidate, hash);
        merged_index
    }

    pub(crate) fn type_symbol(&self, type_index: u32) -> &Symbol {
        &self.entries[self.type_table[type_index as usize] as usize].symbol
    }

    pub(crate) fn type_name(&self, type_index: u32) -> &str {
        self.type_symbol(type_index)
            .value
            .as_deref()
            .expect("type table entries carry a name")
    }

    // ------------------------------------------------------------------
    // Seeding from an existing class
    // ------------------------------------------------------------------

    /// Installs the raw serialized pool of a source class. Lookup state is
    /// rebuilt by replaying every decoded item through [`Self::seed_entry`],
    /// so later adds deduplicate against the copied content and pool indices
    /// of the source class stay valid.
    pub(crate) fn seed_pool(&mut self, raw_pool_body: &[u8], constant_pool_count: u16) {
        debug_assert_eq!(self.constant_pool_count, 1);
        self.constant_pool.put_bytes(raw_pool_body);
        self.constant_pool_count = constant_pool_count as u32;
    }

    /// Registers one decoded pool item under its source index without
    /// writing any bytes.
    pub(crate) fn seed_entry(&mut self, symbol: Symbol) {
        let hash = symbol_hash(&symbol);
        if self.find(hash, &symbol).is_none() {
            self.put(symbol, hash);
        }
    }

    /// Installs the raw BootstrapMethods entries of a source class and
    /// registers each one for byte-exact deduplication.
    pub(crate) fn seed_bootstrap_methods(&mut self, raw_entries: &[u8], offsets: &[usize]) {
        debug_assert_eq!(self.bootstrap_method_count, 0);
        self.bootstrap_methods.put_bytes(raw_entries);
        self.bootstrap_method_count = offsets.len() as u16;
        for (index, window) in offsets.windows(2).enumerate() {
            self.seed_bootstrap_entry(index as u32, window[0], window[1] - window[0]);
        }
        if let Some(&last) = offsets.last() {
            self.seed_bootstrap_entry(
                offsets.len() as u32 - 1,
                last,
                raw_entries.len() - last,
            );
        }
    }

    fn seed_bootstrap_entry(&mut self, index: u32, offset: usize, length: usize) {
        let hash = bytes_hash(
            BOOTSTRAP_METHOD_TAG,
            &self.bootstrap_methods.as_slice()[offset..offset + length],
        );
        let mut symbol = Symbol::new(index, BOOTSTRAP_METHOD_TAG);
        symbol.data = offset as u64 | ((length as u64) << 32);
        self.put(symbol, hash);
    }
}

impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SymbolTable[{} entries, pool count {}, {} bootstrap methods, {} types]",
            self.entries.len(),
            self.constant_pool_count,
            self.bootstrap_method_count,
            self.type_table.len()
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constant::ReferenceKind;

    #[test]
    fn utf8_entries_deduplicate() {
        let mut table = SymbolTable::new();
        let first = table.add_constant_utf8("foo").unwrap();
        let second = table.add_constant_utf8("foo").unwrap();
        assert_eq!(first, second);
        assert_eq!(table.constant_pool_count(), 2);
        // Exactly one CONSTANT_Utf8_info for "foo": tag, length, bytes.
        assert_eq!(table.pool_bytes(), &[1, 0, 3, b'f', b'o', b'o']);
    }

    #[test]
    fn long_reserves_two_indices() {
        let mut table = SymbolTable::new();
        let long_index = table.add_constant_long(42).unwrap();
        let next = table.add_constant_utf8("x").unwrap();
        assert_eq!(long_index, 1);
        assert_eq!(next, 3);
        assert_eq!(table.add_constant_long(42).unwrap(), 1);
    }

    #[test]
    fn numeric_keys_are_bit_patterns() {
        let mut table = SymbolTable::new();
        let plus = table.add_constant_float(0.0).unwrap();
        let minus = table.add_constant_float(-0.0).unwrap();
        assert_ne!(plus, minus);
        assert_eq!(table.add_constant_float(0.0).unwrap(), plus);
    }

    #[test]
    fn member_references_share_sub_entries() {
        let mut table = SymbolTable::new();
        let field = table
            .add_constant_fieldref("java/lang/System", "out", "Ljava/io/PrintStream;")
            .unwrap();
        let again = table
            .add_constant_fieldref("java/lang/System", "out", "Ljava/io/PrintStream;")
            .unwrap();
        assert_eq!(field, again);
        // Interface and class method refs with the same owner/name/descriptor
        // are distinct entries.
        let class_ref = table.add_constant_methodref("A", "m", "()V", false).unwrap();
        let interface_ref = table.add_constant_methodref("A", "m", "()V", true).unwrap();
        assert_ne!(class_ref, interface_ref);
    }

    #[test]
    fn growth_preserves_existing_lookups() {
        let mut table = SymbolTable::new();
        let mut indices = Vec::new();
        for i in 0..200 {
            indices.push(table.add_constant_utf8(&format!("entry{}", i)).unwrap());
        }
        for (i, expected) in indices.iter().enumerate() {
            assert_eq!(
                table.add_constant_utf8(&format!("entry{}", i)).unwrap(),
                *expected
            );
        }
    }

    #[test]
    fn bootstrap_methods_deduplicate_by_bytes() {
        let mut table = SymbolTable::new();
        let handle = Handle::new(
            ReferenceKind::InvokeStatic,
            "java/lang/invoke/LambdaMetafactory",
            "metafactory",
            "(Ljava/lang/invoke/MethodHandles$Lookup;)Ljava/lang/invoke/CallSite;",
            false,
        );
        let first = table
            .add_bootstrap_method(&handle, &[Constant::Integer(7)])
            .unwrap();
        let buffer_len = table.bootstrap_bytes().len();
        let second = table
            .add_bootstrap_method(&handle, &[Constant::Integer(7)])
            .unwrap();
        assert_eq!(first, second);
        // The speculative trailer was truncated away.
        assert_eq!(table.bootstrap_bytes().len(), buffer_len);
        let third = table
            .add_bootstrap_method(&handle, &[Constant::Integer(8)])
            .unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn merged_types_normalize_operand_order() {
        let mut table = SymbolTable::new();
        let a = table.add_type("java/lang/String");
        let b = table.add_type("java/lang/Integer");
        let merged_ab = table.add_merged_type(a, b);
        let merged_ba = table.add_merged_type(b, a);
        assert_eq!(merged_ab, merged_ba);
        assert_eq!(table.type_name(merged_ab), "java/lang/Object");
    }

    #[test]
    fn uninitialized_types_key_on_offset() {
        let mut table = SymbolTable::new();
        let at_zero = table.add_uninitialized_type("Foo", 0);
        let at_nine = table.add_uninitialized_type("Foo", 9);
        assert_ne!(at_zero, at_nine);
        assert_eq!(table.add_uninitialized_type("Foo", 0), at_zero);
    }

    #[test]
    fn pool_overflow_reports_class_name() {
        let mut table = SymbolTable::new();
        table.set_class_info("com/example/Big", 52);
        let mut failed = false;
        for i in 0..70_000u32 {
            match table.add_constant_integer(i as i32) {
                Ok(_) => {}
                Err(Error::ClassTooLarge { class, .. }) => {
                    assert_eq!(class, "com/example/Big");
                    failed = true;
                    break;
                }
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
        assert!(failed);
    }
}
