//! Field type mini-language
//!
//! A [`TypeSpec`] describes the value a field may hold. Specs can be built
//! directly or parsed from a compact textual form:
//!
//! | text          | meaning                              |
//! |---------------|--------------------------------------|
//! | `any`         | anything, no validation              |
//! | `bool`        | boolean                              |
//! | `bytes`       | binary blob                          |
//! | `str`         | UTF-8 string                         |
//! | `int`         | integer, stored as a 64-bit long     |
//! | `float`       | double                               |
//! | `objectid`    | ObjectId (or unset)                  |
//! | `datetime`    | UTC datetime (or unset)              |
//! | `[]`, `[T]`   | list of anything / list of `T`       |
//! | `[A, B, ...]` | fixed-length list, typed by position |
//! | `{}`, `{T}`   | set of anything / set of `T`         |
//! | `Name`        | nested document (needs a resolver)   |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bson::{spec::BinarySubtype, Binary, Bson};
use bsonform_common::{OdmError, Result, ValidationError};

use crate::schema::DocumentSchema;
use crate::validation;

/// Recursive description of a field's expected type
#[derive(Debug, Clone)]
pub enum TypeSpec {
    /// Any value (no validation)
    Any,
    /// Boolean
    Bool,
    /// Binary data
    Blob,
    /// String
    Str,
    /// Integer; always stored as Int64
    Int,
    /// Double-precision float
    Float,
    /// ObjectId, or null
    ObjectId,
    /// UTC datetime, or null
    DateTime,
    /// Variable-length list of one element type
    List(Box<TypeSpec>),
    /// Unordered collection without duplicates, stored as an array
    Set(Box<TypeSpec>),
    /// Fixed-length list with a type per position
    FixedList(Vec<TypeSpec>),
    /// Embedded document following another schema
    Document(Arc<DocumentSchema>),
}

impl TypeSpec {
    /// List of `elem`
    pub fn list(elem: TypeSpec) -> Self {
        TypeSpec::List(Box::new(elem))
    }

    /// Set of `elem`
    pub fn set(elem: TypeSpec) -> Self {
        TypeSpec::Set(Box::new(elem))
    }

    /// Fixed list typed by position
    pub fn fixed(elems: Vec<TypeSpec>) -> Self {
        TypeSpec::FixedList(elems)
    }

    /// Embedded document of `schema`
    pub fn document(schema: &Arc<DocumentSchema>) -> Self {
        TypeSpec::Document(Arc::clone(schema))
    }

    /// Parse the textual mini-language. Nested document names are rejected.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with(text, |_| None)
    }

    /// Parse the textual mini-language, resolving bare names to document schemas
    pub fn parse_with<F>(text: &str, resolve: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<Arc<DocumentSchema>>,
    {
        let mut parser = Parser {
            text,
            chars: text.char_indices().peekable(),
            resolve: &resolve,
        };
        let spec = parser.spec()?;
        parser.skip_ws();
        if parser.chars.peek().is_some() {
            return Err(parser.error());
        }
        Ok(spec)
    }

    /// Get the human-readable type name
    pub fn type_name(&self) -> String {
        match self {
            TypeSpec::Any => "any".to_string(),
            TypeSpec::Bool => "bool".to_string(),
            TypeSpec::Blob => "binary".to_string(),
            TypeSpec::Str => "string".to_string(),
            TypeSpec::Int => "int64".to_string(),
            TypeSpec::Float => "double".to_string(),
            TypeSpec::ObjectId => "objectid".to_string(),
            TypeSpec::DateTime => "datetime".to_string(),
            TypeSpec::List(elem) => format!("array<{}>", elem.type_name()),
            TypeSpec::Set(elem) => format!("set<{}>", elem.type_name()),
            TypeSpec::FixedList(elems) => format!(
                "tuple<{}>",
                elems
                    .iter()
                    .map(TypeSpec::type_name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            TypeSpec::Document(schema) => format!("document<{}>", schema.name()),
        }
    }

    /// The value a field of this type holds when nothing else was declared
    pub fn default_value(&self) -> Bson {
        match self {
            TypeSpec::Any | TypeSpec::ObjectId | TypeSpec::DateTime => Bson::Null,
            TypeSpec::Bool => Bson::Boolean(false),
            TypeSpec::Blob => Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: Vec::new(),
            }),
            TypeSpec::Str => Bson::String(String::new()),
            TypeSpec::Int => Bson::Int64(0),
            TypeSpec::Float => Bson::Double(0.0),
            TypeSpec::List(_) | TypeSpec::Set(_) => Bson::Array(Vec::new()),
            TypeSpec::FixedList(elems) => {
                Bson::Array(elems.iter().map(TypeSpec::default_value).collect())
            }
            TypeSpec::Document(schema) => Bson::Document(schema.default_values()),
        }
    }

    /// Check a user-visible value against this type; `path` prefixes error locations
    pub fn validate(&self, path: &str, value: &Bson) -> std::result::Result<(), ValidationError> {
        validation::validate_field(path, value, self)
    }

    /// Convert a validated user-visible value into its stored form
    pub fn collapse(&self, value: &Bson) -> Bson {
        validation::collapse(value, self)
    }

    /// Convert a stored value back into its user-visible form
    pub fn expand(&self, value: &Bson) -> Bson {
        validation::expand(value, self)
    }

    /// Element type for list-like specs
    pub fn element(&self) -> Option<&TypeSpec> {
        match self {
            TypeSpec::List(elem) | TypeSpec::Set(elem) => Some(elem),
            _ => None,
        }
    }

    /// True for integer and float specs
    pub fn is_numeric(&self) -> bool {
        matches!(self, TypeSpec::Int | TypeSpec::Float)
    }
}

impl PartialEq for TypeSpec {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypeSpec::Any, TypeSpec::Any)
            | (TypeSpec::Bool, TypeSpec::Bool)
            | (TypeSpec::Blob, TypeSpec::Blob)
            | (TypeSpec::Str, TypeSpec::Str)
            | (TypeSpec::Int, TypeSpec::Int)
            | (TypeSpec::Float, TypeSpec::Float)
            | (TypeSpec::ObjectId, TypeSpec::ObjectId)
            | (TypeSpec::DateTime, TypeSpec::DateTime) => true,
            (TypeSpec::List(a), TypeSpec::List(b)) | (TypeSpec::Set(a), TypeSpec::Set(b)) => a == b,
            (TypeSpec::FixedList(a), TypeSpec::FixedList(b)) => a == b,
            (TypeSpec::Document(a), TypeSpec::Document(b)) => {
                Arc::ptr_eq(a, b) || a.name() == b.name()
            }
            _ => false,
        }
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::Any => write!(f, "any"),
            TypeSpec::Bool => write!(f, "bool"),
            TypeSpec::Blob => write!(f, "bytes"),
            TypeSpec::Str => write!(f, "str"),
            TypeSpec::Int => write!(f, "int"),
            TypeSpec::Float => write!(f, "float"),
            TypeSpec::ObjectId => write!(f, "objectid"),
            TypeSpec::DateTime => write!(f, "datetime"),
            TypeSpec::List(elem) if **elem == TypeSpec::Any => write!(f, "[]"),
            TypeSpec::List(elem) => write!(f, "[{}]", elem),
            TypeSpec::Set(elem) if **elem == TypeSpec::Any => write!(f, "{{}}"),
            TypeSpec::Set(elem) => write!(f, "{{{}}}", elem),
            TypeSpec::FixedList(elems) => {
                write!(f, "[")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", elem)?;
                }
                write!(f, "]")
            }
            TypeSpec::Document(schema) => write!(f, "{}", schema.name()),
        }
    }
}

impl FromStr for TypeSpec {
    type Err = OdmError;

    fn from_str(s: &str) -> Result<Self> {
        TypeSpec::parse(s)
    }
}

/// Map a scalar keyword to its spec
fn scalar(word: &str) -> Option<TypeSpec> {
    let spec = match word {
        "any" => TypeSpec::Any,
        "bool" => TypeSpec::Bool,
        "bytes" | "blob" => TypeSpec::Blob,
        "str" | "string" => TypeSpec::Str,
        "int" | "long" => TypeSpec::Int,
        "float" => TypeSpec::Float,
        "objectid" => TypeSpec::ObjectId,
        "datetime" => TypeSpec::DateTime,
        _ => return None,
    };
    Some(spec)
}

struct Parser<'a, F> {
    text: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    resolve: &'a F,
}

impl<F> Parser<'_, F>
where
    F: Fn(&str) -> Option<Arc<DocumentSchema>>,
{
    fn error(&self) -> OdmError {
        OdmError::Schema(format!("'{}' cannot be parsed as a field type", self.text))
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if matches!(self.chars.peek(), Some((_, c)) if *c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn spec(&mut self) -> Result<TypeSpec> {
        self.skip_ws();
        match self.chars.peek().map(|(_, c)| *c) {
            Some('[') => {
                self.chars.next();
                if self.eat(']') {
                    return Ok(TypeSpec::list(TypeSpec::Any));
                }
                let mut elems = vec![self.spec()?];
                while self.eat(',') {
                    elems.push(self.spec()?);
                }
                if !self.eat(']') {
                    return Err(self.error());
                }
                if elems.len() == 1 {
                    Ok(TypeSpec::List(Box::new(elems.remove(0))))
                } else {
                    Ok(TypeSpec::FixedList(elems))
                }
            }
            Some('{') => {
                self.chars.next();
                if self.eat('}') {
                    return Ok(TypeSpec::set(TypeSpec::Any));
                }
                let elem = self.spec()?;
                if !self.eat('}') {
                    return Err(self.error());
                }
                Ok(TypeSpec::set(elem))
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let word = self.word();
                if let Some(spec) = scalar(&word) {
                    return Ok(spec);
                }
                (self.resolve)(&word)
                    .map(TypeSpec::Document)
                    .ok_or_else(|| {
                        OdmError::Schema(format!(
                            "'{}' cannot be parsed as a field type: unknown type '{}'",
                            self.text, word
                        ))
                    })
            }
            _ => Err(self.error()),
        }
    }

    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some((_, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || *c == '_' {
                word.push(*c);
                self.chars.next();
            } else {
                break;
            }
        }
        word
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        assert_eq!(TypeSpec::parse("any").unwrap(), TypeSpec::Any);
        assert_eq!(TypeSpec::parse("bool").unwrap(), TypeSpec::Bool);
        assert_eq!(TypeSpec::parse("bytes").unwrap(), TypeSpec::Blob);
        assert_eq!(TypeSpec::parse("str").unwrap(), TypeSpec::Str);
        assert_eq!(TypeSpec::parse("long").unwrap(), TypeSpec::Int);
        assert_eq!(TypeSpec::parse(" float ").unwrap(), TypeSpec::Float);
        assert_eq!(TypeSpec::parse("objectid").unwrap(), TypeSpec::ObjectId);
        assert_eq!(TypeSpec::parse("datetime").unwrap(), TypeSpec::DateTime);
    }

    #[test]
    fn test_parse_containers() {
        assert_eq!(TypeSpec::parse("[]").unwrap(), TypeSpec::list(TypeSpec::Any));
        assert_eq!(TypeSpec::parse("[int]").unwrap(), TypeSpec::list(TypeSpec::Int));
        assert_eq!(TypeSpec::parse("{}").unwrap(), TypeSpec::set(TypeSpec::Any));
        assert_eq!(TypeSpec::parse("{str}").unwrap(), TypeSpec::set(TypeSpec::Str));
        assert_eq!(
            TypeSpec::parse("[int, str, [float]]").unwrap(),
            TypeSpec::fixed(vec![
                TypeSpec::Int,
                TypeSpec::Str,
                TypeSpec::list(TypeSpec::Float)
            ])
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for text in ["", "[", "[int", "{int, str}", "int]", "number", "[int,]", "42"] {
            let err = TypeSpec::parse(text).unwrap_err();
            assert!(
                matches!(err, OdmError::Schema(_)),
                "expected schema error for {:?}",
                text
            );
        }
    }

    #[test]
    fn test_parse_unknown_name_needs_resolver() {
        let err = TypeSpec::parse("[Address]").unwrap_err();
        assert!(err.to_string().contains("unknown type 'Address'"));
    }

    #[test]
    fn test_display_round_trips() {
        for text in ["[]", "[int]", "{}", "{str}", "[int, str]", "bytes"] {
            let spec = TypeSpec::parse(text).unwrap();
            assert_eq!(spec.to_string(), text);
        }
    }

    #[test]
    fn test_type_names() {
        assert_eq!(TypeSpec::list(TypeSpec::Int).type_name(), "array<int64>");
        assert_eq!(TypeSpec::set(TypeSpec::Str).type_name(), "set<string>");
        assert_eq!(
            TypeSpec::fixed(vec![TypeSpec::Int, TypeSpec::Bool]).type_name(),
            "tuple<int64, bool>"
        );
    }

    #[test]
    fn test_default_values() {
        assert_eq!(TypeSpec::Bool.default_value(), Bson::Boolean(false));
        assert_eq!(TypeSpec::Int.default_value(), Bson::Int64(0));
        assert_eq!(TypeSpec::Float.default_value(), Bson::Double(0.0));
        assert_eq!(TypeSpec::Str.default_value(), Bson::String(String::new()));
        assert_eq!(TypeSpec::ObjectId.default_value(), Bson::Null);
        assert_eq!(TypeSpec::list(TypeSpec::Int).default_value(), Bson::Array(vec![]));
        assert_eq!(
            TypeSpec::fixed(vec![TypeSpec::Int, TypeSpec::Str]).default_value(),
            Bson::Array(vec![Bson::Int64(0), Bson::String(String::new())])
        );
    }
}
