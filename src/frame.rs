//! The abstract type algebra behind stack map frame computation.
//!
//! Types are packed into 32 bit words so a whole frame is a flat `Vec<Ty>`:
//!
//! ```text
//!  [ DIM:6 signed | KIND:4 | FLAGS:2 | VALUE:20 ]
//! ```
//!
//! `DIM` is a signed array dimension delta (negative values appear in output
//! frames, e.g. after `aaload`). `KIND` selects how `VALUE` is interpreted: a
//! JVMS verification item for constants, a type table index for references
//! and uninitialized types, or an input frame position for the deferred
//! `local`/`stack` kinds used in output frames before the block's input frame
//! is known.
//!
//! Each basic block carries one [`Frame`]: the input locals and stack (filled
//! in by the fixpoint merge) plus the block's effect on them, expressed
//! relatively by [`Frame::execute`] as each instruction is visited.

use crate::bytes::ByteVector;
use crate::constant::Constant;
use crate::error::{Error, Result};
use crate::opcodes::*;
use crate::symbol::SymbolTable;

const DIM_SHIFT: u32 = 26;
const KIND_SHIFT: u32 = 22;
const FLAGS_SHIFT: u32 = 20;

const DIM_MASK: u32 = 0xFC00_0000;
const KIND_MASK: u32 = 0x03C0_0000;
const FLAGS_MASK: u32 = 0x0030_0000;
const VALUE_MASK: u32 = 0x000F_FFFF;

/// One array dimension, as an additive delta on the DIM field.
const ARRAY_OF: u32 = 1 << DIM_SHIFT;
/// Minus one array dimension.
const ELEMENT_OF: u32 = (-1i32 << DIM_SHIFT) as u32;

const CONSTANT_KIND: u32 = 1 << KIND_SHIFT;
const REFERENCE_KIND: u32 = 2 << KIND_SHIFT;
const UNINITIALIZED_KIND: u32 = 3 << KIND_SHIFT;
const LOCAL_KIND: u32 = 4 << KIND_SHIFT;
const STACK_KIND: u32 = 5 << KIND_SHIFT;

/// Set on a deferred `local`/`stack` type produced by a store next to the
/// slot: if the referenced input type turns out to be long or double, the
/// resolved type must collapse to TOP because the store clobbered its second
/// slot.
const FLAG_TOP_IF_LONG_OR_DOUBLE: u32 = 1 << FLAGS_SHIFT;

// Verification item values of CONSTANT_KIND types. The first nine match the
// JVMS verification_type_info tags; the last four only describe array element
// types internally and never reach an emitted frame unadorned.
pub(crate) const ITEM_TOP: u32 = 0;
pub(crate) const ITEM_INTEGER: u32 = 1;
pub(crate) const ITEM_FLOAT: u32 = 2;
pub(crate) const ITEM_DOUBLE: u32 = 3;
pub(crate) const ITEM_LONG: u32 = 4;
pub(crate) const ITEM_NULL: u32 = 5;
pub(crate) const ITEM_UNINITIALIZED_THIS: u32 = 6;
pub(crate) const ITEM_OBJECT: u32 = 7;
pub(crate) const ITEM_UNINITIALIZED: u32 = 8;
const ITEM_BOOLEAN: u32 = 9;
const ITEM_BYTE: u32 = 10;
const ITEM_CHAR: u32 = 11;
const ITEM_SHORT: u32 = 12;

/// A packed abstract type. `Ty(0)` doubles as "no type recorded" in output
/// local arrays, which is unambiguous because every real type has a nonzero
/// KIND field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Ty(pub u32);

impl Ty {
    pub const NONE: Ty = Ty(0);
    pub const TOP: Ty = Ty(CONSTANT_KIND | ITEM_TOP);
    pub const INTEGER: Ty = Ty(CONSTANT_KIND | ITEM_INTEGER);
    pub const FLOAT: Ty = Ty(CONSTANT_KIND | ITEM_FLOAT);
    pub const DOUBLE: Ty = Ty(CONSTANT_KIND | ITEM_DOUBLE);
    pub const LONG: Ty = Ty(CONSTANT_KIND | ITEM_LONG);
    pub const NULL: Ty = Ty(CONSTANT_KIND | ITEM_NULL);
    pub const UNINITIALIZED_THIS: Ty = Ty(CONSTANT_KIND | ITEM_UNINITIALIZED_THIS);

    fn kind(self) -> u32 {
        self.0 & KIND_MASK
    }

    fn dim_bits(self) -> u32 {
        self.0 & DIM_MASK
    }

    /// Array dimension as a signed count.
    fn dim(self) -> i32 {
        (self.0 as i32) >> DIM_SHIFT
    }

    fn value(self) -> u32 {
        self.0 & VALUE_MASK
    }

    fn is_long_or_double(self) -> bool {
        self == Ty::LONG || self == Ty::DOUBLE
    }

    pub(crate) fn reference(type_index: u32) -> Ty {
        Ty(REFERENCE_KIND | type_index)
    }

    pub(crate) fn uninitialized(type_index: u32) -> Ty {
        Ty(UNINITIALIZED_KIND | type_index)
    }

    pub(crate) fn is_wide(self) -> bool {
        self.is_long_or_double()
    }

    fn element_of(self) -> Ty {
        Ty(self.0.wrapping_add(ELEMENT_OF))
    }

    fn array_of(self) -> Ty {
        Ty(self.0.wrapping_add(ARRAY_OF))
    }
}

/// Builds the abstract type of an internal class name or array descriptor
/// ("java/lang/String", "[[I", "[Ljava/lang/Object;").
pub(crate) fn type_from_internal_name(symbols: &mut SymbolTable, name: &str) -> Ty {
    if name.starts_with('[') {
        type_from_descriptor(symbols, name)
    } else {
        Ty::reference(symbols.add_type(name))
    }
}

/// Builds the abstract type of a field descriptor, including array
/// dimensions. `V` maps to [`Ty::NONE`].
pub(crate) fn type_from_descriptor(symbols: &mut SymbolTable, descriptor: &str) -> Ty {
    let bytes = descriptor.as_bytes();
    let mut dim = 0usize;
    while dim < bytes.len() && bytes[dim] == b'[' {
        dim += 1;
    }
    let dim_bits = (dim as u32) << DIM_SHIFT;
    let element = match bytes.get(dim) {
        Some(b'Z') => {
            if dim > 0 {
                Ty(CONSTANT_KIND | ITEM_BOOLEAN)
            } else {
                Ty::INTEGER
            }
        }
        Some(b'B') => {
            if dim > 0 {
                Ty(CONSTANT_KIND | ITEM_BYTE)
            } else {
                Ty::INTEGER
            }
        }
        Some(b'C') => {
            if dim > 0 {
                Ty(CONSTANT_KIND | ITEM_CHAR)
            } else {
                Ty::INTEGER
            }
        }
        Some(b'S') => {
            if dim > 0 {
                Ty(CONSTANT_KIND | ITEM_SHORT)
            } else {
                Ty::INTEGER
            }
        }
        Some(b'I') => Ty::INTEGER,
        Some(b'F') => Ty::FLOAT,
        Some(b'J') => Ty::LONG,
        Some(b'D') => Ty::DOUBLE,
        Some(b'L') => {
            let name = &descriptor[dim + 1..descriptor.len() - 1];
            Ty::reference(symbols.add_type(name))
        }
        _ => return Ty::NONE,
    };
    Ty(element.0 | dim_bits)
}

/// Serializes one `verification_type_info` (JVMS §4.7.4).
pub(crate) fn put_verification_type(
    symbols: &mut SymbolTable,
    ty: Ty,
    out: &mut ByteVector,
) -> Result<()> {
    if ty.dim() == 0 {
        match ty.kind() {
            CONSTANT_KIND => {
                debug_assert!(ty.value() <= ITEM_UNINITIALIZED_THIS);
                out.put_u8(ty.value() as u8);
            }
            REFERENCE_KIND => {
                let name = symbols.type_name(ty.value()).to_owned();
                let class_index = symbols.add_constant_class(&name)?;
                out.put_u8(ITEM_OBJECT as u8).put_u16(class_index);
            }
            UNINITIALIZED_KIND => {
                let offset = symbols.type_symbol(ty.value()).data as u16;
                out.put_u8(ITEM_UNINITIALIZED as u8).put_u16(offset);
            }
            _ => unreachable!("deferred type in a resolved frame"),
        }
    } else {
        // Array types are written as an Object item over their descriptor.
        let mut descriptor = String::new();
        for _ in 0..ty.dim() {
            descriptor.push('[');
        }
        match ty.kind() {
            REFERENCE_KIND => {
                descriptor.push('L');
                descriptor.push_str(symbols.type_name(ty.value()));
                descriptor.push(';');
            }
            CONSTANT_KIND => descriptor.push(match ty.value() {
                ITEM_INTEGER => 'I',
                ITEM_FLOAT => 'F',
                ITEM_LONG => 'J',
                ITEM_DOUBLE => 'D',
                ITEM_BOOLEAN => 'Z',
                ITEM_BYTE => 'B',
                ITEM_CHAR => 'C',
                ITEM_SHORT => 'S',
                _ => unreachable!("array of non-array-able item"),
            }),
            _ => unreachable!("array of deferred or uninitialized type"),
        }
        let class_index = symbols.add_constant_class(&descriptor)?;
        out.put_u8(ITEM_OBJECT as u8).put_u16(class_index);
    }
    Ok(())
}

/// Number of frame entries a type slice occupies once the TOP shadowing each
/// long/double is made implicit.
pub(crate) fn collapsed_count(types: &[Ty]) -> usize {
    let mut count = 0;
    let mut i = 0;
    while i < types.len() {
        if types[i].is_long_or_double() {
            i += 2;
        } else {
            i += 1;
        }
        count += 1;
    }
    count
}

/// Iterates a type slice skipping the TOP slot after each long/double.
pub(crate) fn collapsed<'a>(types: &'a [Ty]) -> impl Iterator<Item = Ty> + 'a {
    let mut i = 0;
    std::iter::from_fn(move || {
        if i >= types.len() {
            return None;
        }
        let ty = types[i];
        i += if ty.is_long_or_double() { 2 } else { 1 };
        Some(ty)
    })
}

/// The operand of an instruction, for the parts of [`Frame::execute`] whose
/// stack effect depends on it.
pub(crate) enum InsnOperand<'a> {
    None,
    /// Field or method accesses: the member descriptor plus the method name
    /// for constructor detection.
    Member {
        name: &'a str,
        descriptor: &'a str,
    },
    /// `new`, `anewarray`, `checkcast`, `instanceof`, `multianewarray`.
    TypeName(&'a str),
    /// `ldc` in all widths.
    Constant(&'a Constant),
}

/// Per-basic-block abstract interpreter state.
#[derive(Debug, Default)]
pub(crate) struct Frame {
    /// Types of the locals at block entry; `None` until the fixpoint reaches
    /// the block. Always sized to the method's max locals.
    pub input_locals: Option<Vec<Ty>>,
    /// Types of the operand stack at block entry.
    pub input_stack: Option<Vec<Ty>>,

    /// Types assigned to locals in this block, relative to the input frame;
    /// `Ty::NONE` marks untouched slots.
    output_locals: Vec<Ty>,
    /// Types pushed in this block and not popped again.
    output_stack: Vec<Ty>,
    /// How far below the input stack top this block has popped; never
    /// positive.
    output_stack_start: i32,
    /// Running maximum of the relative stack size, for max_stack.
    pub output_stack_max: u16,

    /// Types a constructor was invoked on in this block.
    initializations: Vec<Ty>,
}

impl Frame {
    pub fn new() -> Self {
        Frame::default()
    }

    /// Relative stack size at the current point of the block.
    pub fn relative_stack_size(&self) -> i32 {
        self.output_stack_start + self.output_stack.len() as i32
    }

    /// Builds the implicit frame at the start of a method from its access
    /// flags and descriptor. `max_locals` is the method's final local count;
    /// slots past the arguments are TOP.
    pub fn set_input_frame_from_descriptor(
        &mut self,
        symbols: &mut SymbolTable,
        access: AccessFlags,
        is_constructor: bool,
        descriptor: &str,
        max_locals: usize,
    ) -> Result<()> {
        let mut locals = Vec::with_capacity(max_locals);
        if !access.contains(AccessFlags::STATIC) {
            if is_constructor {
                locals.push(Ty::UNINITIALIZED_THIS);
            } else {
                let class_name = symbols.class_name().to_owned();
                locals.push(Ty::reference(symbols.add_type(&class_name)));
            }
        }
        for argument in crate::descriptor::argument_types(descriptor)? {
            let ty = type_from_descriptor(symbols, &argument.to_string());
            locals.push(ty);
            if ty.is_long_or_double() {
                locals.push(Ty::TOP);
            }
        }
        while locals.len() < max_locals {
            locals.push(Ty::TOP);
        }
        self.input_locals = Some(locals);
        self.input_stack = Some(Vec::new());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Relative output frame construction
    // ------------------------------------------------------------------

    fn get_local(&mut self, index: usize) -> Ty {
        if index >= self.output_locals.len() {
            // Implicit move of an input local to the output frame.
            return Ty(LOCAL_KIND | index as u32);
        }
        let ty = self.output_locals[index];
        if ty == Ty::NONE {
            let deferred = Ty(LOCAL_KIND | index as u32);
            self.output_locals[index] = deferred;
            deferred
        } else {
            ty
        }
    }

    fn set_local(&mut self, index: usize, ty: Ty) {
        if index >= self.output_locals.len() {
            self.output_locals.resize(index + 1, Ty::NONE);
        }
        self.output_locals[index] = ty;
    }

    fn push(&mut self, ty: Ty) {
        self.output_stack.push(ty);
        let relative = self.relative_stack_size();
        if relative > self.output_stack_max as i32 {
            self.output_stack_max = relative as u16;
        }
    }

    /// Pushes the type(s) of a field descriptor or of a method descriptor's
    /// return type; wide types occupy two slots with TOP on top.
    fn push_descriptor(&mut self, symbols: &mut SymbolTable, descriptor: &str) -> Result<()> {
        let type_descriptor = if descriptor.starts_with('(') {
            &descriptor[crate::descriptor::return_descriptor_offset(descriptor)?..]
        } else {
            descriptor
        };
        let ty = type_from_descriptor(symbols, type_descriptor);
        if ty != Ty::NONE {
            self.push(ty);
            if ty.is_long_or_double() {
                self.push(Ty::TOP);
            }
        }
        Ok(())
    }

    fn pop(&mut self) -> Ty {
        match self.output_stack.pop() {
            Some(ty) => ty,
            None => {
                // The block consumes one more element of its input stack.
                self.output_stack_start -= 1;
                Ty(STACK_KIND | (-self.output_stack_start) as u32)
            }
        }
    }

    fn pop_n(&mut self, count: usize) {
        for _ in 0..count {
            self.pop();
        }
    }

    /// Pops the types of a method descriptor's arguments, or one field
    /// descriptor's worth of slots.
    fn pop_descriptor(&mut self, descriptor: &str) -> Result<()> {
        if descriptor.starts_with('(') {
            let (argument_slots, _) = crate::descriptor::method_descriptor_sizes(descriptor)?;
            self.pop_n(argument_slots);
        } else {
            match descriptor.as_bytes().first() {
                Some(b'J') | Some(b'D') => self.pop_n(2),
                _ => self.pop_n(1),
            }
        }
        Ok(())
    }

    /// A store into `index` clobbers the second slot of a long/double in
    /// `index - 1`.
    fn invalidate_neighbor(&mut self, index: usize) {
        if index == 0 {
            return;
        }
        let previous = self.get_local(index - 1);
        if previous.is_long_or_double() {
            self.set_local(index - 1, Ty::TOP);
        } else if previous.kind() == LOCAL_KIND || previous.kind() == STACK_KIND {
            // Whether the neighbor was wide is not known yet; tag it so
            // resolution collapses it to TOP if it was.
            self.set_local(index - 1, Ty(previous.0 | FLAG_TOP_IF_LONG_OR_DOUBLE));
        }
    }

    fn store(&mut self, index: usize, ty: Ty) {
        self.set_local(index, ty);
        self.invalidate_neighbor(index);
    }

    fn store_wide(&mut self, index: usize, ty: Ty) {
        self.set_local(index, ty);
        self.set_local(index + 1, Ty::TOP);
        self.invalidate_neighbor(index);
    }

    /// Simulates one instruction. `arg` is the opcode-dependent integer
    /// operand: a local index for loads/stores/iinc/ret, the immediate for
    /// bipush/sipush, the dimension count for multianewarray, the operand
    /// byte for newarray, and the bytecode offset of the instruction itself
    /// for `new` (to tag the uninitialized type it pushes).
    pub fn execute(
        &mut self,
        opcode: u8,
        arg: i32,
        operand: InsnOperand<'_>,
        symbols: &mut SymbolTable,
    ) -> Result<()> {
        match opcode {
            NOP | INEG | LNEG | FNEG | DNEG | I2B | I2C | I2S | GOTO | RETURN => {}
            ACONST_NULL => self.push(Ty::NULL),
            ICONST_M1..=ICONST_5 | BIPUSH | SIPUSH => self.push(Ty::INTEGER),
            LCONST_0 | LCONST_1 => {
                self.push(Ty::LONG);
                self.push(Ty::TOP);
            }
            FCONST_0..=FCONST_2 => self.push(Ty::FLOAT),
            DCONST_0 | DCONST_1 => {
                self.push(Ty::DOUBLE);
                self.push(Ty::TOP);
            }
            LDC | LDC_W | LDC2_W => match operand {
                InsnOperand::Constant(constant) => match constant {
                    Constant::Integer(_) => self.push(Ty::INTEGER),
                    Constant::Float(_) => self.push(Ty::FLOAT),
                    Constant::Long(_) => {
                        self.push(Ty::LONG);
                        self.push(Ty::TOP);
                    }
                    Constant::Double(_) => {
                        self.push(Ty::DOUBLE);
                        self.push(Ty::TOP);
                    }
                    Constant::String(_) => {
                        self.push(Ty::reference(symbols.add_type("java/lang/String")))
                    }
                    Constant::Class(_) => {
                        self.push(Ty::reference(symbols.add_type("java/lang/Class")))
                    }
                    Constant::MethodType(_) => self.push(Ty::reference(
                        symbols.add_type("java/lang/invoke/MethodType"),
                    )),
                    Constant::MethodHandle(_) => self.push(Ty::reference(
                        symbols.add_type("java/lang/invoke/MethodHandle"),
                    )),
                    Constant::Dynamic(dynamic) => {
                        self.push_descriptor(symbols, &dynamic.descriptor)?
                    }
                },
                _ => unreachable!("ldc without a constant operand"),
            },
            ILOAD => self.push(Ty::INTEGER),
            LLOAD => {
                self.push(Ty::LONG);
                self.push(Ty::TOP);
            }
            FLOAD => self.push(Ty::FLOAT),
            DLOAD => {
                self.push(Ty::DOUBLE);
                self.push(Ty::TOP);
            }
            ALOAD => {
                let local = self.get_local(arg as usize);
                self.push(local);
            }
            IALOAD | BALOAD | CALOAD | SALOAD => {
                self.pop_n(2);
                self.push(Ty::INTEGER);
            }
            LALOAD => {
                self.pop_n(2);
                self.push(Ty::LONG);
                self.push(Ty::TOP);
            }
            FALOAD => {
                self.pop_n(2);
                self.push(Ty::FLOAT);
            }
            DALOAD => {
                self.pop_n(2);
                self.push(Ty::DOUBLE);
                self.push(Ty::TOP);
            }
            AALOAD => {
                self.pop();
                let array = self.pop();
                if array == Ty::NULL {
                    self.push(Ty::NULL);
                } else {
                    self.push(array.element_of());
                }
            }
            ISTORE | FSTORE | ASTORE => {
                let ty = self.pop();
                self.store(arg as usize, ty);
            }
            LSTORE | DSTORE => {
                self.pop();
                let ty = self.pop();
                self.store_wide(arg as usize, ty);
            }
            IASTORE | BASTORE | CASTORE | SASTORE | FASTORE | AASTORE => self.pop_n(3),
            LASTORE | DASTORE => self.pop_n(4),
            POP | MONITORENTER | MONITOREXIT | IFEQ..=IFLE | IFNULL | IFNONNULL | TABLESWITCH
            | LOOKUPSWITCH | IRETURN | FRETURN | ARETURN | ATHROW => {
                self.pop();
            }
            POP2 | IF_ICMPEQ..=IF_ACMPNE | LRETURN | DRETURN => self.pop_n(2),
            DUP => {
                let t1 = self.pop();
                self.push(t1);
                self.push(t1);
            }
            DUP_X1 => {
                let t1 = self.pop();
                let t2 = self.pop();
                self.push(t1);
                self.push(t2);
                self.push(t1);
            }
            DUP_X2 => {
                let t1 = self.pop();
                let t2 = self.pop();
                let t3 = self.pop();
                self.push(t1);
                self.push(t3);
                self.push(t2);
                self.push(t1);
            }
            DUP2 => {
                let t1 = self.pop();
                let t2 = self.pop();
                self.push(t2);
                self.push(t1);
                self.push(t2);
                self.push(t1);
            }
            DUP2_X1 => {
                let t1 = self.pop();
                let t2 = self.pop();
                let t3 = self.pop();
                self.push(t2);
                self.push(t1);
                self.push(t3);
                self.push(t2);
                self.push(t1);
            }
            DUP2_X2 => {
                let t1 = self.pop();
                let t2 = self.pop();
                let t3 = self.pop();
                let t4 = self.pop();
                self.push(t2);
                self.push(t1);
                self.push(t4);
                self.push(t3);
                self.push(t2);
                self.push(t1);
            }
            SWAP => {
                let t1 = self.pop();
                let t2 = self.pop();
                self.push(t1);
                self.push(t2);
            }
            IADD | ISUB | IMUL | IDIV | IREM | IAND | IOR | IXOR | ISHL | ISHR | IUSHR
            | L2I | D2I | FCMPL | FCMPG => {
                self.pop_n(2);
                self.push(Ty::INTEGER);
            }
            LADD | LSUB | LMUL | LDIV | LREM | LAND | LOR | LXOR => {
                self.pop_n(4);
                self.push(Ty::LONG);
                self.push(Ty::TOP);
            }
            FADD | FSUB | FMUL | FDIV | FREM | L2F | D2F => {
                self.pop_n(2);
                self.push(Ty::FLOAT);
            }
            DADD | DSUB | DMUL | DDIV | DREM => {
                self.pop_n(4);
                self.push(Ty::DOUBLE);
                self.push(Ty::TOP);
            }
            LSHL | LSHR | LUSHR => {
                self.pop_n(3);
                self.push(Ty::LONG);
                self.push(Ty::TOP);
            }
            IINC => self.set_local(arg as usize, Ty::INTEGER),
            I2L | F2L => {
                self.pop();
                self.push(Ty::LONG);
                self.push(Ty::TOP);
            }
            I2F => {
                self.pop();
                self.push(Ty::FLOAT);
            }
            I2D | F2D => {
                self.pop();
                self.push(Ty::DOUBLE);
                self.push(Ty::TOP);
            }
            L2D => {
                self.pop_n(2);
                self.push(Ty::DOUBLE);
                self.push(Ty::TOP);
            }
            F2I => {
                self.pop();
                self.push(Ty::INTEGER);
            }
            D2L => {
                self.pop_n(2);
                self.push(Ty::LONG);
                self.push(Ty::TOP);
            }
            LCMP | DCMPL | DCMPG => {
                self.pop_n(4);
                self.push(Ty::INTEGER);
            }
            GETSTATIC | GETFIELD => match operand {
                InsnOperand::Member { descriptor, .. } => {
                    if opcode == GETFIELD {
                        self.pop();
                    }
                    self.push_descriptor(symbols, descriptor)?;
                }
                _ => unreachable!("field access without a member operand"),
            },
            PUTSTATIC | PUTFIELD => match operand {
                InsnOperand::Member { descriptor, .. } => {
                    self.pop_descriptor(descriptor)?;
                    if opcode == PUTFIELD {
                        self.pop();
                    }
                }
                _ => unreachable!("field access without a member operand"),
            },
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => match operand {
                InsnOperand::Member { name, descriptor } => {
                    self.pop_descriptor(descriptor)?;
                    if opcode != INVOKESTATIC {
                        let receiver = self.pop();
                        if opcode == INVOKESPECIAL && name == "<init>" {
                            self.initializations.push(receiver);
                        }
                    }
                    self.push_descriptor(symbols, descriptor)?;
                }
                _ => unreachable!("method call without a member operand"),
            },
            INVOKEDYNAMIC => match operand {
                InsnOperand::Member { descriptor, .. } => {
                    self.pop_descriptor(descriptor)?;
                    self.push_descriptor(symbols, descriptor)?;
                }
                _ => unreachable!("invokedynamic without a member operand"),
            },
            NEW => match operand {
                InsnOperand::TypeName(name) => {
                    let index = symbols.add_uninitialized_type(name, arg as u32);
                    self.push(Ty::uninitialized(index));
                }
                _ => unreachable!("new without a type operand"),
            },
            NEWARRAY => {
                self.pop();
                let descriptor = match num_traits::FromPrimitive::from_i32(arg) {
                    Some(NewArrayType::Boolean) => "[Z",
                    Some(NewArrayType::Char) => "[C",
                    Some(NewArrayType::Float) => "[F",
                    Some(NewArrayType::Double) => "[D",
                    Some(NewArrayType::Byte) => "[B",
                    Some(NewArrayType::Short) => "[S",
                    Some(NewArrayType::Int) => "[I",
                    Some(NewArrayType::Long) => "[J",
                    None => {
                        return Err(Error::unsupported(format!(
                            "invalid newarray operand {}",
                            arg
                        )))
                    }
                };
                let ty = type_from_descriptor(symbols, descriptor);
                self.push(ty);
            }
            ANEWARRAY => match operand {
                InsnOperand::TypeName(name) => {
                    self.pop();
                    let ty = type_from_internal_name(symbols, name);
                    self.push(ty.array_of());
                }
                _ => unreachable!("anewarray without a type operand"),
            },
            ARRAYLENGTH => {
                self.pop();
                self.push(Ty::INTEGER);
            }
            CHECKCAST => match operand {
                InsnOperand::TypeName(name) => {
                    self.pop();
                    self.push(type_from_internal_name(symbols, name));
                }
                _ => unreachable!("checkcast without a type operand"),
            },
            INSTANCEOF => {
                self.pop();
                self.push(Ty::INTEGER);
            }
            MULTIANEWARRAY => match operand {
                InsnOperand::TypeName(descriptor) => {
                    self.pop_n(arg as usize);
                    self.push(type_from_descriptor(symbols, descriptor));
                }
                _ => unreachable!("multianewarray without a type operand"),
            },
            _ => {
                return Err(Error::unsupported(format!(
                    "opcode {} under frame computation",
                    opcode
                )))
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fixpoint support
    // ------------------------------------------------------------------

    /// Resolves one output abstract type against the (now known) input frame
    /// and this block's constructor invocations.
    fn concrete_type(&self, symbols: &mut SymbolTable, abstract_ty: Ty) -> Ty {
        let mut concrete = match abstract_ty.kind() {
            LOCAL_KIND => {
                let input = self.input_locals.as_ref().expect("input frame resolved");
                Ty(abstract_ty
                    .dim_bits()
                    .wrapping_add(input[abstract_ty.value() as usize].0))
            }
            STACK_KIND => {
                let input = self.input_stack.as_ref().expect("input frame resolved");
                Ty(abstract_ty
                    .dim_bits()
                    .wrapping_add(input[input.len() - abstract_ty.value() as usize].0))
            }
            _ => Ty(abstract_ty.0 & !FLAGS_MASK),
        };
        if abstract_ty.0 & FLAG_TOP_IF_LONG_OR_DOUBLE != 0 && concrete.is_long_or_double() {
            concrete = Ty::TOP;
        }
        self.initialized(symbols, concrete)
    }

    /// Replaces a type a constructor was invoked on in this block by the
    /// corresponding initialized reference type.
    fn initialized(&self, symbols: &mut SymbolTable, ty: Ty) -> Ty {
        if ty != Ty::UNINITIALIZED_THIS && ty.kind() != UNINITIALIZED_KIND {
            return ty;
        }
        for initialization in &self.initializations {
            let mut initialized_ty = *initialization;
            match initialized_ty.kind() {
                LOCAL_KIND => {
                    let input = self.input_locals.as_ref().expect("input frame resolved");
                    initialized_ty = Ty(initialized_ty
                        .dim_bits()
                        .wrapping_add(input[initialized_ty.value() as usize].0));
                }
                STACK_KIND => {
                    let input = self.input_stack.as_ref().expect("input frame resolved");
                    initialized_ty = Ty(initialized_ty
                        .dim_bits()
                        .wrapping_add(input[input.len() - initialized_ty.value() as usize].0));
                }
                _ => {}
            }
            if ty == initialized_ty {
                return if ty == Ty::UNINITIALIZED_THIS {
                    let class_name = symbols.class_name().to_owned();
                    Ty::reference(symbols.add_type(&class_name))
                } else {
                    let name = symbols.type_symbol(ty.value()).value.clone();
                    Ty::reference(symbols.add_type(name.as_deref().unwrap_or("java/lang/Object")))
                };
            }
        }
        ty
    }

    /// Computes the concrete `(locals, stack)` at the end of this block, for
    /// merging into successors.
    pub fn concrete_output_frame(&self, symbols: &mut SymbolTable) -> (Vec<Ty>, Vec<Ty>) {
        let input_locals = self.input_locals.as_ref().expect("input frame resolved");
        let input_stack = self.input_stack.as_ref().expect("input frame resolved");

        let mut locals = Vec::with_capacity(input_locals.len());
        for index in 0..input_locals.len() {
            let concrete = match self.output_locals.get(index) {
                Some(&ty) if ty != Ty::NONE => self.concrete_type(symbols, ty),
                _ => self.initialized(symbols, input_locals[index]),
            };
            locals.push(concrete);
        }

        let surviving_input =
            (input_stack.len() as i32 + self.output_stack_start).max(0) as usize;
        let mut stack = Vec::with_capacity(surviving_input + self.output_stack.len());
        for &ty in &input_stack[..surviving_input] {
            stack.push(self.initialized(symbols, ty));
        }
        for &ty in &self.output_stack {
            stack.push(self.concrete_type(symbols, ty));
        }
        (locals, stack)
    }

    /// Merges a predecessor's concrete output into this block's input frame.
    /// For an exception edge `catch_type` is the caught exception's type and
    /// the stack collapses to that one element. Returns whether the input
    /// frame changed.
    pub fn merge_input(
        &mut self,
        symbols: &mut SymbolTable,
        source_locals: &[Ty],
        source_stack: &[Ty],
        catch_type: Option<Ty>,
    ) -> Result<bool> {
        let mut changed = false;

        if self.input_locals.is_none() {
            self.input_locals = Some(vec![Ty::NONE; source_locals.len()]);
            changed = true;
        }
        {
            let input_locals = self.input_locals.as_mut().unwrap();
            if input_locals.len() != source_locals.len() {
                return Err(Error::state("inconsistent local count at jump target"));
            }
            for (index, &source) in source_locals.iter().enumerate() {
                changed |= merge_types(symbols, source, &mut input_locals[index]);
            }
        }

        match catch_type {
            Some(caught) => {
                if self.input_stack.is_none() {
                    self.input_stack = Some(vec![Ty::NONE]);
                    changed = true;
                }
                let input_stack = self.input_stack.as_mut().unwrap();
                if input_stack.is_empty() {
                    input_stack.push(Ty::NONE);
                    changed = true;
                }
                changed |= merge_types(symbols, caught, &mut input_stack[0]);
            }
            None => {
                if self.input_stack.is_none() {
                    self.input_stack = Some(vec![Ty::NONE; source_stack.len()]);
                    changed = true;
                }
                let input_stack = self.input_stack.as_mut().unwrap();
                if input_stack.len() != source_stack.len() {
                    return Err(Error::state("inconsistent stack height at jump target"));
                }
                for (index, &source) in source_stack.iter().enumerate() {
                    changed |= merge_types(symbols, source, &mut input_stack[index]);
                }
            }
        }
        Ok(changed)
    }

    /// Concrete input locals with initializations applied, used when merging
    /// into an exception handler (reachable from any instruction of the
    /// block, including the first).
    pub fn initialized_input_locals(&self, symbols: &mut SymbolTable) -> Vec<Ty> {
        self.input_locals
            .as_ref()
            .expect("input frame resolved")
            .iter()
            .map(|&ty| self.initialized(symbols, ty))
            .collect()
    }
}

/// Field-wise merge of `source` into `dst`. Returns whether `dst` changed.
fn merge_types(symbols: &mut SymbolTable, source: Ty, dst: &mut Ty) -> bool {
    let dst_ty = *dst;
    if dst_ty == source {
        return false;
    }

    // Any dimension of NULL behaves as plain NULL for merging.
    let source = if source.0 & !DIM_MASK == Ty::NULL.0 {
        Ty::NULL
    } else {
        source
    };

    if dst_ty == Ty::NONE {
        *dst = source;
        return true;
    }

    let merged;
    if dst_ty.dim() != 0 || dst_ty.kind() == REFERENCE_KIND {
        if source == Ty::NULL {
            // NULL into a reference or array type changes nothing.
            return false;
        } else if source.0 & (DIM_MASK | KIND_MASK) == dst_ty.0 & (DIM_MASK | KIND_MASK) {
            if dst_ty.kind() == REFERENCE_KIND {
                // Same dimension, both references: common super class at
                // that dimension.
                merged = Ty(
                    (source.0 & DIM_MASK)
                        | REFERENCE_KIND
                        | symbols.add_merged_type(source.value(), dst_ty.value()),
                );
            } else {
                // Same dimension arrays of different primitive kinds: an
                // array of Object one dimension down.
                let merged_dim = ELEMENT_OF.wrapping_add(source.0 & DIM_MASK);
                merged = Ty(merged_dim | REFERENCE_KIND | symbols.add_type("java/lang/Object"));
            }
        } else if source.dim() != 0 || source.kind() == REFERENCE_KIND {
            // Different dimensions: min dimension (one less when the element
            // is a primitive) of Object.
            let source_dim = if source.dim() != 0 && source.kind() != REFERENCE_KIND {
                ELEMENT_OF.wrapping_add(source.0 & DIM_MASK)
            } else {
                source.0 & DIM_MASK
            };
            let dst_dim = if dst_ty.dim() != 0 && dst_ty.kind() != REFERENCE_KIND {
                ELEMENT_OF.wrapping_add(dst_ty.0 & DIM_MASK)
            } else {
                dst_ty.0 & DIM_MASK
            };
            let min_dim = std::cmp::min(source_dim as i32, dst_dim as i32) as u32;
            merged = Ty(min_dim | REFERENCE_KIND | symbols.add_type("java/lang/Object"));
        } else {
            merged = Ty::TOP;
        }
    } else if dst_ty == Ty::NULL {
        // NULL absorbs any reference or array type.
        merged = if source.dim() != 0 || source.kind() == REFERENCE_KIND {
            source
        } else {
            Ty::TOP
        };
    } else {
        merged = Ty::TOP;
    }

    if merged != dst_ty {
        *dst = merged;
        return true;
    }
    false
}

#[cfg(test)]
mod test {
    use super::*;

    fn reference(symbols: &mut SymbolTable, name: &str) -> Ty {
        Ty::reference(symbols.add_type(name))
    }

    #[test]
    fn descriptor_types_pack_dimensions() {
        let mut symbols = SymbolTable::new();
        assert_eq!(type_from_descriptor(&mut symbols, "I"), Ty::INTEGER);
        assert_eq!(type_from_descriptor(&mut symbols, "J"), Ty::LONG);
        let object = type_from_descriptor(&mut symbols, "Ljava/lang/Object;");
        assert_eq!(object.dim(), 0);
        let matrix = type_from_descriptor(&mut symbols, "[[I");
        assert_eq!(matrix.dim(), 2);
        assert_eq!(matrix.element_of().dim(), 1);
        assert_eq!(type_from_descriptor(&mut symbols, "[Z").value(), ITEM_BOOLEAN);
        assert_eq!(type_from_descriptor(&mut symbols, "Z"), Ty::INTEGER);
        assert_eq!(object, type_from_internal_name(&mut symbols, "java/lang/Object"));
    }

    #[test]
    fn merge_with_null_keeps_reference() {
        let mut symbols = SymbolTable::new();
        let string = reference(&mut symbols, "java/lang/String");
        let mut dst = string;
        assert!(!merge_types(&mut symbols, Ty::NULL, &mut dst));
        assert_eq!(dst, string);

        let mut dst = Ty::NULL;
        assert!(merge_types(&mut symbols, string, &mut dst));
        assert_eq!(dst, string);
    }

    #[test]
    fn merge_unrelated_references_to_object() {
        let mut symbols = SymbolTable::new();
        let string = reference(&mut symbols, "java/lang/String");
        let integer = reference(&mut symbols, "java/lang/Integer");
        let mut dst = string;
        assert!(merge_types(&mut symbols, integer, &mut dst));
        assert_eq!(symbols.type_name(dst.value()), "java/lang/Object");
        assert_eq!(dst.dim(), 0);
    }

    #[test]
    fn merge_arrays_of_different_primitives() {
        let mut symbols = SymbolTable::new();
        let ints = type_from_descriptor(&mut symbols, "[I");
        let floats = type_from_descriptor(&mut symbols, "[F");
        let mut dst = ints;
        assert!(merge_types(&mut symbols, floats, &mut dst));
        // [I merged with [F is Object (one dimension down from the arrays).
        assert_eq!(dst.dim(), 0);
        assert_eq!(dst.kind(), REFERENCE_KIND);
        assert_eq!(symbols.type_name(dst.value()), "java/lang/Object");
    }

    #[test]
    fn merge_mismatched_kinds_to_top() {
        let mut symbols = SymbolTable::new();
        let string = reference(&mut symbols, "java/lang/String");
        let mut dst = Ty::INTEGER;
        assert!(merge_types(&mut symbols, string, &mut dst));
        assert_eq!(dst, Ty::TOP);
    }

    #[test]
    fn simple_block_effect_resolves_concretely() {
        let mut symbols = SymbolTable::new();
        symbols.set_class_info("Example", 52);
        let mut frame = Frame::new();
        frame
            .set_input_frame_from_descriptor(
                &mut symbols,
                AccessFlags::STATIC,
                false,
                "(I)I",
                1,
            )
            .unwrap();
        // iload_0; iconst_1; iadd
        frame.execute(ILOAD, 0, InsnOperand::None, &mut symbols).unwrap();
        frame.execute(ICONST_1, 0, InsnOperand::None, &mut symbols).unwrap();
        frame.execute(IADD, 0, InsnOperand::None, &mut symbols).unwrap();
        let (locals, stack) = frame.concrete_output_frame(&mut symbols);
        assert_eq!(locals, vec![Ty::INTEGER]);
        assert_eq!(stack, vec![Ty::INTEGER]);
        assert_eq!(frame.output_stack_max, 2);
    }

    #[test]
    fn constructor_call_initializes_pushed_type() {
        let mut symbols = SymbolTable::new();
        symbols.set_class_info("Example", 52);
        let mut frame = Frame::new();
        frame
            .set_input_frame_from_descriptor(&mut symbols, AccessFlags::STATIC, false, "()V", 2)
            .unwrap();
        // new Foo; dup; invokespecial Foo.<init>()V; astore_1
        frame
            .execute(NEW, 0, InsnOperand::TypeName("Foo"), &mut symbols)
            .unwrap();
        frame.execute(DUP, 0, InsnOperand::None, &mut symbols).unwrap();
        frame
            .execute(
                INVOKESPECIAL,
                0,
                InsnOperand::Member {
                    name: "<init>",
                    descriptor: "()V",
                },
                &mut symbols,
            )
            .unwrap();
        frame.execute(ASTORE, 1, InsnOperand::None, &mut symbols).unwrap();
        let (locals, stack) = frame.concrete_output_frame(&mut symbols);
        assert!(stack.is_empty());
        assert_eq!(locals[1].kind(), REFERENCE_KIND);
        assert_eq!(symbols.type_name(locals[1].value()), "Foo");
    }

    #[test]
    fn store_clobbers_wide_neighbor() {
        let mut symbols = SymbolTable::new();
        symbols.set_class_info("Example", 52);
        let mut frame = Frame::new();
        frame
            .set_input_frame_from_descriptor(&mut symbols, AccessFlags::STATIC, false, "(J)V", 3)
            .unwrap();
        // iconst_0; istore_1 overwrites the second half of the long in 0..1.
        frame.execute(ICONST_0, 0, InsnOperand::None, &mut symbols).unwrap();
        frame.execute(ISTORE, 1, InsnOperand::None, &mut symbols).unwrap();
        let (locals, _) = frame.concrete_output_frame(&mut symbols);
        assert_eq!(locals[0], Ty::TOP);
        assert_eq!(locals[1], Ty::INTEGER);
    }

    #[test]
    fn collapse_makes_wide_tops_implicit() {
        let types = [Ty::LONG, Ty::TOP, Ty::INTEGER, Ty::DOUBLE, Ty::TOP];
        assert_eq!(collapsed_count(&types), 3);
        let collapsed: Vec<Ty> = collapsed(&types).collect();
        assert_eq!(collapsed, vec![Ty::LONG, Ty::INTEGER, Ty::DOUBLE]);
    }
}
