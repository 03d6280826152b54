use super::{BinaryName, Name};
use crate::util::Width;
use std::io::{Error, ErrorKind, Result};
use std::iter::Peekable;
use std::str::Chars;

/// Types which can be read from the descriptor syntax of the class file format
pub trait ParseDescriptor: Sized {
    /// Parse a whole string as a descriptor
    fn parse(source: &str) -> Result<Self> {
        let mut chars = source.chars().peekable();
        let parsed = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(parsed),
            Some(c) => Err(invalid(format!("Unexpected '{}' after descriptor", c))),
        }
    }

    /// Read one descriptor off the front of a character stream
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self>;
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidInput, msg.into())
}

fn eof(msg: &str) -> Error {
    Error::new(ErrorKind::UnexpectedEof, msg)
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    fn from_char(c: char) -> Option<BaseType> {
        Some(match c {
            'B' => BaseType::Byte,
            'C' => BaseType::Char,
            'D' => BaseType::Double,
            'F' => BaseType::Float,
            'I' => BaseType::Int,
            'J' => BaseType::Long,
            'S' => BaseType::Short,
            'Z' => BaseType::Boolean,
            _ => return None,
        })
    }
}

/// `long` and `double` take two slots, everything else one
impl Width for BaseType {
    fn width(&self) -> usize {
        match self {
            BaseType::Double | BaseType::Long => 2,
            _ => 1,
        }
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let c = source.next().ok_or_else(|| eof("Missing base type"))?;
        BaseType::from_char(c).ok_or_else(|| invalid(format!("'{}' is not a base type", c)))
    }
}

/// Reference type
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum RefType<Class> {
    Object(Class),
    ObjectArray(ArrayType<Class>),
    PrimitiveArray(ArrayType<BaseType>),
}

/// Array type, flattened into its innermost element type and nesting depth
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ArrayType<T> {
    /// Additional dimensions (`A[]` has 0 additional dimensions, `A[][][][]` has 3)
    pub additional_dimensions: usize,

    /// Innermost element type (`A` for `A[][]`)
    pub element_type: T,
}

/// Class names appear as `L<binary name>;`
impl ParseDescriptor for BinaryName {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if source.next() != Some('L') {
            return Err(invalid("Class descriptor must start with 'L'"));
        }

        let mut class_name = String::new();
        for c in source.by_ref() {
            if c == ';' {
                return BinaryName::from_string(class_name).map_err(invalid);
            }
            class_name.push(c);
        }
        Err(eof("Class descriptor is missing its ';'"))
    }
}

impl<C: ParseDescriptor> ParseDescriptor for RefType<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let mut dimensions = 0;
        while source.next_if_eq(&'[').is_some() {
            dimensions += 1;
        }

        let is_class = match source.peek() {
            Some('L') => true,
            Some(_) if dimensions > 0 => false,
            Some(c) => return Err(invalid(format!("'{}' does not start a reference type", c))),
            None => return Err(eof("Missing reference type")),
        };

        Ok(match (dimensions, is_class) {
            (0, _) => RefType::Object(C::parse_from(source)?),
            (n, true) => RefType::ObjectArray(ArrayType {
                additional_dimensions: n - 1,
                element_type: C::parse_from(source)?,
            }),
            (n, false) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: n - 1,
                element_type: BaseType::parse_from(source)?,
            }),
        })
    }
}

impl<C> RefType<C> {
    /// Array whose elements have the given type
    pub fn array(element: FieldType<C>) -> RefType<C> {
        match element {
            FieldType::Base(element_type) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::Object(element_type)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::PrimitiveArray(inner)) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: inner.additional_dimensions + 1,
                element_type: inner.element_type,
            }),
            FieldType::Ref(RefType::ObjectArray(inner)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: inner.additional_dimensions + 1,
                element_type: inner.element_type,
            }),
        }
    }

    /// Type of the elements of an array type (`None` if this is not an array)
    pub fn array_element(&self) -> Option<FieldType<C>>
    where
        C: Clone,
    {
        match self {
            RefType::Object(_) => None,
            RefType::PrimitiveArray(arr) => Some(match arr.additional_dimensions {
                0 => FieldType::Base(arr.element_type),
                n => FieldType::Ref(RefType::PrimitiveArray(ArrayType {
                    additional_dimensions: n - 1,
                    element_type: arr.element_type,
                })),
            }),
            RefType::ObjectArray(arr) => Some(match arr.additional_dimensions {
                0 => FieldType::Ref(RefType::Object(arr.element_type.clone())),
                n => FieldType::Ref(RefType::ObjectArray(ArrayType {
                    additional_dimensions: n - 1,
                    element_type: arr.element_type.clone(),
                })),
            }),
        }
    }
}

/// Type of a field, parameter, return value, or local variable
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType<Class> {
    Base(BaseType),
    Ref(RefType<Class>),
}

impl<C> Width for FieldType<C> {
    fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            FieldType::Ref(_) => 1,
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for FieldType<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.peek() {
            Some('L' | '[') => RefType::parse_from(source).map(FieldType::Ref),
            Some(_) => BaseType::parse_from(source).map(FieldType::Base),
            None => Err(eof("Missing field type")),
        }
    }
}

/// Signature of a method
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct MethodDescriptor<Class> {
    pub parameters: Vec<FieldType<Class>>,

    /// `None` for `void`
    pub return_type: Option<FieldType<Class>>,
}

impl<C> MethodDescriptor<C> {
    /// Number of local slots the arguments take up, optionally counting a receiver
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let receiver = usize::from(has_this_param);
        receiver + self.parameters.iter().map(Width::width).sum::<usize>()
    }
}

impl<C: ParseDescriptor> ParseDescriptor for MethodDescriptor<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if source.next() != Some('(') {
            return Err(invalid("Method descriptor must start with '('"));
        }

        let mut parameters = vec![];
        loop {
            match source.peek() {
                Some(')') => {
                    source.next();
                    break;
                }
                Some(_) => parameters.push(FieldType::parse_from(source)?),
                None => return Err(eof("Method descriptor is missing its ')'")),
            }
        }

        let return_type = match source.next_if_eq(&'V') {
            Some(_) => None,
            None => Some(FieldType::parse_from(source)?),
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}
