use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Class file format version as a `(major, minor)` pair. Ordering follows the
/// JVMS rule that a greater major version always wins, with the minor version
/// breaking ties.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ClassVersion(pub u16, pub u16);

pub const V1_1: ClassVersion = ClassVersion(45, 3);
pub const V1_2: ClassVersion = ClassVersion(46, 0);
pub const V1_3: ClassVersion = ClassVersion(47, 0);
pub const V1_4: ClassVersion = ClassVersion(48, 0);
pub const V1_5: ClassVersion = ClassVersion(49, 0);
pub const V1_6: ClassVersion = ClassVersion(50, 0);
pub const V1_7: ClassVersion = ClassVersion(51, 0);
pub const V1_8: ClassVersion = ClassVersion(52, 0);
pub const V9: ClassVersion = ClassVersion(53, 0);
pub const V10: ClassVersion = ClassVersion(54, 0);
pub const V11: ClassVersion = ClassVersion(55, 0);
pub const V12: ClassVersion = ClassVersion(56, 0);
pub const V13: ClassVersion = ClassVersion(57, 0);
pub const V14: ClassVersion = ClassVersion(58, 0);
pub const V15: ClassVersion = ClassVersion(59, 0);
pub const V16: ClassVersion = ClassVersion(60, 0);
pub const V17: ClassVersion = ClassVersion(61, 0);
pub const V18: ClassVersion = ClassVersion(62, 0);
pub const V19: ClassVersion = ClassVersion(63, 0);
pub const V20: ClassVersion = ClassVersion(64, 0);
pub const V21: ClassVersion = ClassVersion(65, 0);

impl ClassVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        ClassVersion(major, minor)
    }

    pub fn major(self) -> u16 {
        self.0
    }

    pub fn minor(self) -> u16 {
        self.1
    }

    /// Whether stack map frames are written with the compressed
    /// `StackMapTable` encoding rather than the uncompressed `StackMap` form
    /// used by pre-1.6 class files.
    pub fn supports_stack_map_table(self) -> bool {
        self.0 >= V1_6.0
    }
}

impl PartialOrd for ClassVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClassVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.0.cmp(&other.0) {
            Ordering::Equal => self.1.cmp(&other.1),
            x => x,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn version_ordering() {
        assert!(V1_8 < V9);
        assert!(V1_1 < V1_2);
        assert!(ClassVersion(52, 3) > ClassVersion(52, 0));
        assert_eq!(V17, ClassVersion::new(61, 0));
    }
}
