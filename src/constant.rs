//! Value-level representations of loadable constants: the operands of `ldc`,
//! `invokedynamic` bootstrap arguments, and `ConstantValue` field
//! initializers.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// The kind of a `CONSTANT_MethodHandle_info` reference (JVMS §4.4.8). Kinds
/// 1 through 4 reference fields, 5 through 9 reference methods.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum ReferenceKind {
    GetField = 1,
    GetStatic = 2,
    PutField = 3,
    PutStatic = 4,
    InvokeVirtual = 5,
    InvokeStatic = 6,
    InvokeSpecial = 7,
    NewInvokeSpecial = 8,
    InvokeInterface = 9,
}

impl ReferenceKind {
    pub fn is_field(self) -> bool {
        (self as u8) <= 4
    }
}

/// A method handle: a field or method reference plus the kind of access
/// performed through it. Value-equal by component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub kind: ReferenceKind,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub is_interface: bool,
}

impl Handle {
    pub fn new(
        kind: ReferenceKind,
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        is_interface: bool,
    ) -> Self {
        Handle {
            kind,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            is_interface,
        }
    }
}

impl Display for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}{} ({})",
            self.owner, self.name, self.descriptor, self.kind as u8
        )?;
        if self.is_interface {
            write!(f, " itf")?;
        }
        Ok(())
    }
}

/// A `CONSTANT_Dynamic_info` constant: a name-and-descriptor resolved at run
/// time by a bootstrap method. Occupies two slots when the descriptor is `J`
/// or `D`. Equality is component-wise including ordered bootstrap arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDynamic {
    pub name: String,
    pub descriptor: String,
    pub bootstrap_method: Handle,
    pub bootstrap_arguments: Vec<Constant>,
}

impl ConstantDynamic {
    pub fn new(
        name: impl Into<String>,
        descriptor: impl Into<String>,
        bootstrap_method: Handle,
        bootstrap_arguments: Vec<Constant>,
    ) -> Self {
        ConstantDynamic {
            name: name.into(),
            descriptor: descriptor.into(),
            bootstrap_method,
            bootstrap_arguments,
        }
    }

    /// Stack/local slot count of the resolved value.
    pub fn slots(&self) -> usize {
        match self.descriptor.as_bytes().first() {
            Some(b'J') | Some(b'D') => 2,
            _ => 1,
        }
    }
}

/// A loadable constant. `Class` and `MethodType` carry descriptors in their
/// JVMS string forms (an internal name or array descriptor for `Class`, a
/// method descriptor for `MethodType`).
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(String),
    MethodType(String),
    MethodHandle(Handle),
    Dynamic(ConstantDynamic),
}

impl Constant {
    /// Whether this constant occupies two constant pool slots and must be
    /// loaded with `ldc2_w`.
    pub fn is_wide(&self) -> bool {
        match self {
            Constant::Long(_) | Constant::Double(_) => true,
            Constant::Dynamic(dynamic) => dynamic.slots() == 2,
            _ => false,
        }
    }
}

impl From<i32> for Constant {
    fn from(value: i32) -> Self {
        Constant::Integer(value)
    }
}

impl From<i64> for Constant {
    fn from(value: i64) -> Self {
        Constant::Long(value)
    }
}

impl From<f32> for Constant {
    fn from(value: f32) -> Self {
        Constant::Float(value)
    }
}

impl From<f64> for Constant {
    fn from(value: f64) -> Self {
        Constant::Double(value)
    }
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Constant::String(value.to_owned())
    }
}

impl From<Handle> for Constant {
    fn from(value: Handle) -> Self {
        Constant::MethodHandle(value)
    }
}

impl From<ConstantDynamic> for Constant {
    fn from(value: ConstantDynamic) -> Self {
        Constant::Dynamic(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dynamic_slot_count_follows_descriptor() {
        let handle = Handle::new(
            ReferenceKind::InvokeStatic,
            "java/lang/invoke/ConstantBootstraps",
            "invoke",
            "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/Class;)Ljava/lang/Object;",
            false,
        );
        let narrow = ConstantDynamic::new("c", "I", handle.clone(), vec![]);
        let wide = ConstantDynamic::new("c", "J", handle, vec![]);
        assert_eq!(narrow.slots(), 1);
        assert_eq!(wide.slots(), 2);
        assert!(!Constant::Dynamic(narrow).is_wide());
        assert!(Constant::Dynamic(wide).is_wide());
    }

    #[test]
    fn reference_kind_field_split() {
        assert!(ReferenceKind::PutStatic.is_field());
        assert!(!ReferenceKind::InvokeVirtual.is_field());
    }
}
