//! Field and method descriptor utilities (JVMS §4.3). The writer mostly
//! walks descriptors without building an owned representation; the
//! [`FieldDescriptor`] enum exists for callers that want a parsed form.

use std::fmt::{self, Debug, Display, Formatter};

use crate::error::{Error, Result};

#[derive(Clone, PartialEq, Eq)]
pub enum FieldDescriptor {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Object(String),
    Array(Box<FieldDescriptor>),
    Void,
}

impl Debug for FieldDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, f)
    }
}

impl Display for FieldDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FieldDescriptor::Byte => write!(f, "B"),
            FieldDescriptor::Char => write!(f, "C"),
            FieldDescriptor::Double => write!(f, "D"),
            FieldDescriptor::Float => write!(f, "F"),
            FieldDescriptor::Int => write!(f, "I"),
            FieldDescriptor::Long => write!(f, "J"),
            FieldDescriptor::Short => write!(f, "S"),
            FieldDescriptor::Boolean => write!(f, "Z"),
            FieldDescriptor::Object(name) => write!(f, "L{};", name),
            FieldDescriptor::Array(entry) => write!(f, "[{}", entry),
            FieldDescriptor::Void => write!(f, "V"),
        }
    }
}

impl FieldDescriptor {
    /// Number of local variable or operand stack slots a value of this type
    /// occupies.
    pub fn slots(&self) -> usize {
        match self {
            FieldDescriptor::Long | FieldDescriptor::Double => 2,
            FieldDescriptor::Void => 0,
            _ => 1,
        }
    }

    pub fn parse(descriptor: &str) -> Result<Self> {
        let (parsed, rest) = split_field_descriptor(descriptor)?;
        if !rest.is_empty() {
            return Err(Error::malformed(0, format!("trailing characters in descriptor {}", descriptor)));
        }
        Ok(parsed)
    }
}

fn split_field_descriptor(descriptor: &str) -> Result<(FieldDescriptor, &str)> {
    let mut chars = descriptor.chars();
    let parsed = match chars.next() {
        Some('B') => FieldDescriptor::Byte,
        Some('C') => FieldDescriptor::Char,
        Some('D') => FieldDescriptor::Double,
        Some('F') => FieldDescriptor::Float,
        Some('I') => FieldDescriptor::Int,
        Some('J') => FieldDescriptor::Long,
        Some('S') => FieldDescriptor::Short,
        Some('Z') => FieldDescriptor::Boolean,
        Some('V') => FieldDescriptor::Void,
        Some('L') => {
            let rest = chars.as_str();
            match rest.find(';') {
                Some(end) => {
                    return Ok((
                        FieldDescriptor::Object(rest[..end].to_owned()),
                        &rest[end + 1..],
                    ))
                }
                None => {
                    return Err(Error::malformed(
                        0,
                        format!("unterminated object descriptor {}", descriptor),
                    ))
                }
            }
        }
        Some('[') => {
            let (element, rest) = split_field_descriptor(chars.as_str())?;
            return Ok((FieldDescriptor::Array(Box::new(element)), rest));
        }
        other => {
            return Err(Error::malformed(
                0,
                format!("invalid descriptor character {:?}", other),
            ))
        }
    };
    Ok((parsed, chars.as_str()))
}

/// Parses the argument types of a method descriptor into an ordered sequence.
pub fn argument_types(method_descriptor: &str) -> Result<Vec<FieldDescriptor>> {
    let inner = method_descriptor
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .ok_or_else(|| {
            Error::malformed(0, format!("invalid method descriptor {}", method_descriptor))
        })?;

    let mut remaining = inner.0;
    let mut types = Vec::new();
    while !remaining.is_empty() {
        let (parsed, rest) = split_field_descriptor(remaining)?;
        types.push(parsed);
        remaining = rest;
    }
    Ok(types)
}

/// Parses the return type of a method descriptor.
pub fn return_type(method_descriptor: &str) -> Result<FieldDescriptor> {
    let offset = return_descriptor_offset(method_descriptor)?;
    FieldDescriptor::parse(&method_descriptor[offset..])
}

/// Byte offset of the return descriptor within a method descriptor string.
pub fn return_descriptor_offset(method_descriptor: &str) -> Result<usize> {
    match method_descriptor.find(')') {
        Some(close) => Ok(close + 1),
        None => Err(Error::malformed(
            0,
            format!("invalid method descriptor {}", method_descriptor),
        )),
    }
}

/// Computes `(argument_slots, return_slots)` for a method descriptor, where
/// `long` and `double` occupy two slots and everything else one. The argument
/// count does not include the implicit `this` slot of instance methods.
pub fn method_descriptor_sizes(method_descriptor: &str) -> Result<(usize, usize)> {
    let mut args_slots = 0usize;
    let mut chars = method_descriptor.char_indices();
    match chars.next() {
        Some((_, '(')) => {}
        _ => {
            return Err(Error::malformed(
                0,
                format!("invalid method descriptor {}", method_descriptor),
            ))
        }
    }

    while let Some((offset, c)) = chars.next() {
        match c {
            ')' => {
                let return_desc = &method_descriptor[offset + 1..];
                let return_slots = match return_desc.chars().next() {
                    Some('V') => 0,
                    Some('J') | Some('D') => 2,
                    Some(_) => 1,
                    None => {
                        return Err(Error::malformed(
                            0,
                            format!("missing return type in {}", method_descriptor),
                        ))
                    }
                };
                return Ok((args_slots, return_slots));
            }
            'J' | 'D' => args_slots += 2,
            'B' | 'C' | 'F' | 'I' | 'S' | 'Z' => args_slots += 1,
            '[' => {
                args_slots += 1;
                // Consume the remaining dimensions and the element type.
                loop {
                    match chars.next() {
                        Some((_, '[')) => continue,
                        Some((_, 'L')) => {
                            skip_object_name(&mut chars, method_descriptor)?;
                            break;
                        }
                        Some((_, 'B')) | Some((_, 'C')) | Some((_, 'D')) | Some((_, 'F'))
                        | Some((_, 'I')) | Some((_, 'J')) | Some((_, 'S')) | Some((_, 'Z')) => {
                            break
                        }
                        _ => {
                            return Err(Error::malformed(
                                0,
                                format!("invalid array descriptor in {}", method_descriptor),
                            ))
                        }
                    }
                }
            }
            'L' => {
                args_slots += 1;
                skip_object_name(&mut chars, method_descriptor)?;
            }
            _ => {
                return Err(Error::malformed(
                    0,
                    format!("invalid descriptor character {} in {}", c, method_descriptor),
                ))
            }
        }
    }

    Err(Error::malformed(
        0,
        format!("unterminated method descriptor {}", method_descriptor),
    ))
}

fn skip_object_name(
    chars: &mut std::str::CharIndices<'_>,
    descriptor: &str,
) -> Result<()> {
    for (_, c) in chars {
        if c == ';' {
            return Ok(());
        }
    }
    Err(Error::malformed(
        0,
        format!("unterminated object descriptor in {}", descriptor),
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn argument_and_return_sizes() {
        assert_eq!(method_descriptor_sizes("()V").unwrap(), (0, 0));
        assert_eq!(method_descriptor_sizes("(I)I").unwrap(), (1, 1));
        assert_eq!(
            method_descriptor_sizes("(IJLjava/lang/Object;)D").unwrap(),
            (4, 2)
        );
        assert_eq!(method_descriptor_sizes("([[J[I)J").unwrap(), (2, 2));
        assert_eq!(
            method_descriptor_sizes("(Ljava/lang/String;Z)V").unwrap(),
            (2, 0)
        );
    }

    #[test]
    fn argument_types_preserve_order() {
        let args = argument_types("(I[JLjava/lang/String;)V").unwrap();
        assert_eq!(args.len(), 3);
        assert_eq!(args[0], FieldDescriptor::Int);
        assert_eq!(
            args[1],
            FieldDescriptor::Array(Box::new(FieldDescriptor::Long))
        );
        assert_eq!(
            args[2],
            FieldDescriptor::Object("java/lang/String".to_owned())
        );
    }

    #[test]
    fn return_descriptor_offset_points_past_parenthesis() {
        assert_eq!(return_descriptor_offset("(II)J").unwrap(), 4);
        assert_eq!(return_type("(II)J").unwrap(), FieldDescriptor::Long);
    }

    #[test]
    fn malformed_descriptors_are_rejected() {
        assert!(method_descriptor_sizes("IJ)V").is_err());
        assert!(method_descriptor_sizes("(Ljava/lang/String").is_err());
        assert!(FieldDescriptor::parse("Q").is_err());
    }
}
