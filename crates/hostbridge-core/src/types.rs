//! Declared types of parameters, properties and return values.
//!
//! A [`TypeRef`] is the bridge's description of what a member expects or
//! produces. Type tags (`"{package}/{TypeName}"`) name exported host types.

use std::collections::HashMap;
use std::fmt;

/// Declared type of a parameter, property or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// The universal object type: accepts any value.
    Any,
    /// No value (void return).
    Unit,
    Bool,
    Int,
    Float,
    String,
    DateTime,
    Duration,
    Uuid,
    /// Exported enum type, by tag.
    Enum(String),
    /// Exported non-generic host type, by tag.
    Named(String),
    /// Open type parameter of a generic method or type.
    Generic(String),
    /// Generic type definition with type arguments.
    Constructed {
        definition: String,
        args: Vec<TypeRef>,
    },
    /// Array or read-only list, crosses by value.
    Array(Box<TypeRef>),
    /// Mutable list, crosses by handle.
    List(Box<TypeRef>),
    /// Mutable string-keyed map, crosses by handle.
    Dict(Box<TypeRef>),
    /// Any one of the listed shapes; the first structural match wins.
    Union(Vec<TypeRef>),
    /// Function-valued parameter implemented by the driver.
    Callback(Box<CallbackShape>),
    CancellationToken,
    /// Inline structured value deserialized by the host.
    Json,
}

/// Signature of a callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallbackShape {
    pub params: Vec<TypeRef>,
    pub returns: TypeRef,
    /// Awaitable return. Synchronous shapes are invoked with a blocking wait.
    pub is_async: bool,
}

impl CallbackShape {
    /// True when the last parameter is a cancellation token.
    pub fn has_trailing_token(&self) -> bool {
        matches!(self.params.last(), Some(TypeRef::CancellationToken))
    }
}

impl TypeRef {
    pub fn named(tag: impl Into<String>) -> Self {
        TypeRef::Named(tag.into())
    }

    pub fn generic(name: impl Into<String>) -> Self {
        TypeRef::Generic(name.into())
    }

    pub fn enumeration(tag: impl Into<String>) -> Self {
        TypeRef::Enum(tag.into())
    }

    pub fn constructed(definition: impl Into<String>, args: Vec<TypeRef>) -> Self {
        TypeRef::Constructed {
            definition: definition.into(),
            args,
        }
    }

    pub fn array(element: TypeRef) -> Self {
        TypeRef::Array(Box::new(element))
    }

    pub fn list(element: TypeRef) -> Self {
        TypeRef::List(Box::new(element))
    }

    pub fn dict(value: TypeRef) -> Self {
        TypeRef::Dict(Box::new(value))
    }

    /// Synchronous callback shape.
    pub fn callback(params: Vec<TypeRef>, returns: TypeRef) -> Self {
        TypeRef::Callback(Box::new(CallbackShape {
            params,
            returns,
            is_async: false,
        }))
    }

    /// Awaitable callback shape.
    pub fn async_callback(params: Vec<TypeRef>, returns: TypeRef) -> Self {
        TypeRef::Callback(Box::new(CallbackShape {
            params,
            returns,
            is_async: true,
        }))
    }

    /// Simple types cross the boundary by value.
    pub fn is_simple(&self) -> bool {
        matches!(
            self,
            TypeRef::Bool
                | TypeRef::Int
                | TypeRef::Float
                | TypeRef::String
                | TypeRef::DateTime
                | TypeRef::Duration
                | TypeRef::Uuid
                | TypeRef::Enum(_)
        )
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, TypeRef::Array(_) | TypeRef::List(_) | TypeRef::Dict(_))
    }

    /// Whether a property of this type can be represented on the wire.
    pub fn is_wire_compatible(&self) -> bool {
        match self {
            TypeRef::Unit
            | TypeRef::Generic(_)
            | TypeRef::Callback(_)
            | TypeRef::CancellationToken => false,
            TypeRef::Array(inner) | TypeRef::List(inner) | TypeRef::Dict(inner) => {
                inner.is_wire_compatible()
            }
            TypeRef::Constructed { args, .. } => args.iter().all(TypeRef::is_wire_compatible),
            TypeRef::Union(options) => options.iter().all(TypeRef::is_wire_compatible),
            _ => true,
        }
    }

    /// Whether any open type parameter appears in this type.
    pub fn contains_generic(&self) -> bool {
        match self {
            TypeRef::Generic(_) => true,
            TypeRef::Array(inner) | TypeRef::List(inner) | TypeRef::Dict(inner) => {
                inner.contains_generic()
            }
            TypeRef::Constructed { args, .. } | TypeRef::Union(args) => {
                args.iter().any(TypeRef::contains_generic)
            }
            TypeRef::Callback(shape) => {
                shape.returns.contains_generic() || shape.params.iter().any(TypeRef::contains_generic)
            }
            _ => false,
        }
    }

    /// Replace type parameters with their bindings. Unbound parameters stay open.
    pub fn substitute(&self, bindings: &HashMap<String, TypeRef>) -> TypeRef {
        match self {
            TypeRef::Generic(name) => bindings.get(name).cloned().unwrap_or_else(|| self.clone()),
            TypeRef::Array(inner) => TypeRef::Array(Box::new(inner.substitute(bindings))),
            TypeRef::List(inner) => TypeRef::List(Box::new(inner.substitute(bindings))),
            TypeRef::Dict(inner) => TypeRef::Dict(Box::new(inner.substitute(bindings))),
            TypeRef::Constructed { definition, args } => TypeRef::Constructed {
                definition: definition.clone(),
                args: args.iter().map(|arg| arg.substitute(bindings)).collect(),
            },
            TypeRef::Union(options) => {
                TypeRef::Union(options.iter().map(|opt| opt.substitute(bindings)).collect())
            }
            TypeRef::Callback(shape) => TypeRef::Callback(Box::new(CallbackShape {
                params: shape.params.iter().map(|p| p.substitute(bindings)).collect(),
                returns: shape.returns.substitute(bindings),
                is_async: shape.is_async,
            })),
            other => other.clone(),
        }
    }

    /// Tag of the exported type this refers to, if any.
    pub fn tag(&self) -> Option<&str> {
        match self {
            TypeRef::Named(tag) | TypeRef::Enum(tag) => Some(tag),
            TypeRef::Constructed { definition, .. } => Some(definition),
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Any => write!(f, "any"),
            TypeRef::Unit => write!(f, "void"),
            TypeRef::Bool => write!(f, "boolean"),
            TypeRef::Int => write!(f, "int"),
            TypeRef::Float => write!(f, "number"),
            TypeRef::String => write!(f, "string"),
            TypeRef::DateTime => write!(f, "datetime"),
            TypeRef::Duration => write!(f, "duration"),
            TypeRef::Uuid => write!(f, "uuid"),
            TypeRef::Enum(tag) | TypeRef::Named(tag) | TypeRef::Generic(tag) => write!(f, "{}", tag),
            TypeRef::Constructed { definition, args } => {
                write!(f, "{}<", definition)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ">")
            }
            TypeRef::Array(inner) => write!(f, "{}[]", inner),
            TypeRef::List(inner) => write!(f, "List<{}>", inner),
            TypeRef::Dict(inner) => write!(f, "Dict<string, {}>", inner),
            TypeRef::Union(options) => {
                for (i, option) in options.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", option)?;
                }
                Ok(())
            }
            TypeRef::Callback(shape) => {
                write!(f, "(")?;
                for (i, param) in shape.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                if shape.is_async {
                    write!(f, ") => Promise<{}>", shape.returns)
                } else {
                    write!(f, ") => {}", shape.returns)
                }
            }
            TypeRef::CancellationToken => write!(f, "CancellationToken"),
            TypeRef::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let ty = TypeRef::constructed("pkg/Box", vec![TypeRef::Int]);
        assert_eq!(ty.to_string(), "pkg/Box<int>");
        assert_eq!(TypeRef::array(TypeRef::String).to_string(), "string[]");
        assert_eq!(
            TypeRef::Union(vec![TypeRef::String, TypeRef::Int]).to_string(),
            "string | int"
        );
    }

    #[test]
    fn test_substitute() {
        let mut bindings = HashMap::new();
        bindings.insert("T".to_string(), TypeRef::String);

        let open = TypeRef::list(TypeRef::generic("T"));
        assert!(open.contains_generic());
        let closed = open.substitute(&bindings);
        assert_eq!(closed, TypeRef::list(TypeRef::String));
        assert!(!closed.contains_generic());
    }

    #[test]
    fn test_wire_compatibility() {
        assert!(TypeRef::String.is_wire_compatible());
        assert!(TypeRef::named("pkg/Thing").is_wire_compatible());
        assert!(!TypeRef::callback(vec![], TypeRef::Unit).is_wire_compatible());
        assert!(!TypeRef::CancellationToken.is_wire_compatible());
        assert!(!TypeRef::array(TypeRef::CancellationToken).is_wire_compatible());
    }

    #[test]
    fn test_trailing_token() {
        let shape = CallbackShape {
            params: vec![TypeRef::String, TypeRef::CancellationToken],
            returns: TypeRef::Unit,
            is_async: true,
        };
        assert!(shape.has_trailing_token());
    }
}
