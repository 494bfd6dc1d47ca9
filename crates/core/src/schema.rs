// Schema Derivation
//
// Turns a tool's declared signature into its public contract: an input schema
// (object with one property per public parameter), an output schema, and the
// list of parameters that are filled from runtime context instead.
//
// Design decisions:
// - Declared types are described at compile time via `DescribeType`; the mapping
//   to schema nodes happens once, when the descriptor is built
// - `TypeHint` is the intermediate form so shapes with no Rust type (unions,
//   opaque classes, callables) can still be declared explicitly
// - Unions other than `T | None` collapse to a generic object (known precision loss)

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::injection::InjectionDescriptor;

// ============================================================================
// JSON primitive categories
// ============================================================================

/// JSON schema primitive type categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl JsonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonType::String => "string",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::Boolean => "boolean",
            JsonType::Array => "array",
            JsonType::Object => "object",
            JsonType::Null => "null",
        }
    }

    /// Category of a concrete JSON value.
    ///
    /// Numbers representable as i64/u64 are `Integer`, all others `Number`.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => JsonType::Null,
            Value::Bool(_) => JsonType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => JsonType::Integer,
            Value::Number(_) => JsonType::Number,
            Value::String(_) => JsonType::String,
            Value::Array(_) => JsonType::Array,
            Value::Object(_) => JsonType::Object,
        }
    }

    /// Whether `value` belongs to this category. An integer satisfies `number`.
    pub fn accepts(&self, value: &Value) -> bool {
        let actual = Self::of(value);
        actual == *self || (*self == JsonType::Number && actual == JsonType::Integer)
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Declared types
// ============================================================================

/// A declared parameter or return type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeHint {
    String,
    Integer,
    Float,
    Bool,
    /// Homogeneous sequence; element type when statically known
    Sequence(Option<Box<TypeHint>>),
    /// Fixed-arity sequence
    Tuple(Vec<TypeHint>),
    /// String-keyed mapping; value type when exactly one is declared
    Mapping(Option<Box<TypeHint>>),
    Optional(Box<TypeHint>),
    Union(Vec<TypeHint>),
    NoneType,
    /// No constraint at all
    Any,
    /// Classes, composite records, callables: anything without a primitive mapping
    Opaque(String),
}

impl TypeHint {
    pub fn sequence_of(element: TypeHint) -> Self {
        TypeHint::Sequence(Some(Box::new(element)))
    }

    pub fn mapping_of(value: TypeHint) -> Self {
        TypeHint::Mapping(Some(Box::new(value)))
    }

    pub fn optional(inner: TypeHint) -> Self {
        TypeHint::Optional(Box::new(inner))
    }

    pub fn union(alternatives: impl IntoIterator<Item = TypeHint>) -> Self {
        TypeHint::Union(alternatives.into_iter().collect())
    }

    pub fn opaque(name: impl Into<String>) -> Self {
        TypeHint::Opaque(name.into())
    }

    /// True for `Optional(T)` and for the two-member union `T | None`.
    pub fn is_optional(&self) -> bool {
        match self {
            TypeHint::Optional(_) => true,
            TypeHint::Union(alts) => simple_optional(alts).is_some(),
            _ => false,
        }
    }
}

/// For `[T, None]` or `[None, T]` returns `T`.
fn simple_optional(alternatives: &[TypeHint]) -> Option<&TypeHint> {
    match alternatives {
        [inner, TypeHint::NoneType] | [TypeHint::NoneType, inner]
            if *inner != TypeHint::NoneType =>
        {
            Some(inner)
        }
        _ => None,
    }
}

/// Compile-time description of a Rust type as a declared tool type.
pub trait DescribeType {
    fn type_hint() -> TypeHint;
}

macro_rules! describe_as {
    ($hint:expr => $($ty:ty),+ $(,)?) => {
        $(
            impl DescribeType for $ty {
                fn type_hint() -> TypeHint {
                    $hint
                }
            }
        )+
    };
}

describe_as!(TypeHint::String => String, str, char);
describe_as!(TypeHint::Integer => i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
describe_as!(TypeHint::Float => f32, f64);
describe_as!(TypeHint::Bool => bool);
describe_as!(TypeHint::Any => Value);
describe_as!(TypeHint::NoneType => ());
describe_as!(TypeHint::Mapping(None) => serde_json::Map<String, Value>);

impl<T: DescribeType + ?Sized> DescribeType for &T {
    fn type_hint() -> TypeHint {
        T::type_hint()
    }
}

impl<T: DescribeType + ?Sized> DescribeType for Box<T> {
    fn type_hint() -> TypeHint {
        T::type_hint()
    }
}

impl<T: DescribeType> DescribeType for Option<T> {
    fn type_hint() -> TypeHint {
        TypeHint::optional(T::type_hint())
    }
}

impl<T: DescribeType> DescribeType for Vec<T> {
    fn type_hint() -> TypeHint {
        TypeHint::sequence_of(T::type_hint())
    }
}

impl<T: DescribeType> DescribeType for [T] {
    fn type_hint() -> TypeHint {
        TypeHint::sequence_of(T::type_hint())
    }
}

impl<T: DescribeType> DescribeType for VecDeque<T> {
    fn type_hint() -> TypeHint {
        TypeHint::sequence_of(T::type_hint())
    }
}

impl<T: DescribeType, S> DescribeType for HashSet<T, S> {
    fn type_hint() -> TypeHint {
        TypeHint::sequence_of(T::type_hint())
    }
}

impl<T: DescribeType> DescribeType for BTreeSet<T> {
    fn type_hint() -> TypeHint {
        TypeHint::sequence_of(T::type_hint())
    }
}

impl<K, V: DescribeType, S> DescribeType for HashMap<K, V, S> {
    fn type_hint() -> TypeHint {
        TypeHint::mapping_of(V::type_hint())
    }
}

impl<K, V: DescribeType> DescribeType for BTreeMap<K, V> {
    fn type_hint() -> TypeHint {
        TypeHint::mapping_of(V::type_hint())
    }
}

macro_rules! describe_tuple {
    ($($name:ident),+) => {
        impl<$($name: DescribeType),+> DescribeType for ($($name,)+) {
            fn type_hint() -> TypeHint {
                TypeHint::Tuple(vec![$($name::type_hint()),+])
            }
        }
    };
}

describe_tuple!(A);
describe_tuple!(A, B);
describe_tuple!(A, B, C);
describe_tuple!(A, B, C, D);

// ============================================================================
// Schema nodes
// ============================================================================

/// A JSON schema node for one parameter or return value.
///
/// An all-default node serializes to `{}` (no constraint).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaNode {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<JsonType>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<SchemaItems>,

    #[serde(
        rename = "additionalProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<Box<SchemaNode>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Array item schemas: one schema for every element, or one per position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaItems {
    Positional(Vec<SchemaNode>),
    Uniform(Box<SchemaNode>),
}

impl SchemaNode {
    /// The empty, unconstrained schema
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of_type(kind: JsonType) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        *self == Self::default()
    }

    fn with_nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Map a declared type to its schema node.
pub fn schema_for(hint: &TypeHint) -> SchemaNode {
    match hint {
        TypeHint::String => SchemaNode::of_type(JsonType::String),
        TypeHint::Integer => SchemaNode::of_type(JsonType::Integer),
        TypeHint::Float => SchemaNode::of_type(JsonType::Number),
        TypeHint::Bool => SchemaNode::of_type(JsonType::Boolean),
        TypeHint::NoneType => SchemaNode::of_type(JsonType::Null),
        TypeHint::Any => SchemaNode::any(),
        TypeHint::Sequence(element) => SchemaNode {
            items: element
                .as_deref()
                .map(|e| SchemaItems::Uniform(Box::new(schema_for(e)))),
            ..SchemaNode::of_type(JsonType::Array)
        },
        TypeHint::Tuple(elements) => SchemaNode {
            items: (!elements.is_empty())
                .then(|| SchemaItems::Positional(elements.iter().map(schema_for).collect())),
            ..SchemaNode::of_type(JsonType::Array)
        },
        TypeHint::Mapping(value) => SchemaNode {
            additional_properties: value.as_deref().map(|v| Box::new(schema_for(v))),
            ..SchemaNode::of_type(JsonType::Object)
        },
        TypeHint::Optional(inner) => schema_for(inner).with_nullable(),
        TypeHint::Union(alternatives) => match simple_optional(alternatives) {
            Some(inner) => schema_for(inner).with_nullable(),
            None => SchemaNode::of_type(JsonType::Object),
        },
        TypeHint::Opaque(_) => SchemaNode::of_type(JsonType::Object),
    }
}

// ============================================================================
// Input schema
// ============================================================================

/// Object schema describing a tool's public parameters, in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputSchema {
    properties: Vec<(String, SchemaNode)>,
    required: Vec<String>,
}

impl InputSchema {
    pub fn property(&self, name: &str) -> Option<&SchemaNode> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &SchemaNode)> {
        self.properties.iter().map(|(n, node)| (n.as_str(), node))
    }

    pub fn property_names(&self) -> Vec<&str> {
        self.properties.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Render as a JSON value (property order is not preserved by `Value`).
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

struct OrderedProperties<'a>(&'a [(String, SchemaNode)]);

impl Serialize for OrderedProperties<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, node) in self.0 {
            map.serialize_entry(name, node)?;
        }
        map.end()
    }
}

impl Serialize for InputSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("type", &JsonType::Object)?;
        map.serialize_entry("properties", &OrderedProperties(&self.properties))?;
        map.serialize_entry("required", &self.required)?;
        map.end()
    }
}

// ============================================================================
// Signatures
// ============================================================================

/// Default declared for a parameter.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ParamDefault {
    /// No default: the caller must supply it
    #[default]
    Required,
    /// Defaults to null; optional, nothing embedded in the schema
    Null,
    /// Concrete default embedded in the schema node
    Value(Value),
}

impl From<Value> for ParamDefault {
    fn from(value: Value) -> Self {
        if value.is_null() {
            ParamDefault::Null
        } else {
            ParamDefault::Value(value)
        }
    }
}

/// Marks a parameter as filled from runtime context under `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectMarker {
    pub key: String,
    pub required: bool,
}

impl InjectMarker {
    /// Required injection from context `key`
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            required: true,
        }
    }

    /// Make the injection optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub hint: TypeHint,
    pub default: ParamDefault,
    pub inject: Option<InjectMarker>,
    /// Implicit receiver (`self`), never part of the contract
    pub receiver: bool,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, hint: TypeHint) -> Self {
        Self {
            name: name.into(),
            hint,
            default: ParamDefault::Required,
            inject: None,
            receiver: false,
        }
    }

    pub fn receiver() -> Self {
        Self {
            receiver: true,
            ..Self::new("self", TypeHint::Any)
        }
    }

    pub fn with_default(mut self, default: impl Into<ParamDefault>) -> Self {
        self.default = default.into();
        self
    }

    pub fn injected(mut self, marker: InjectMarker) -> Self {
        self.inject = Some(marker);
        self
    }
}

/// A callable's declared parameters and return type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Signature {
    pub params: Vec<ParamSpec>,
    /// `None` means the return type is undeclared (unconstrained output)
    pub returns: Option<TypeHint>,
}

/// Result of deriving schemas from a signature.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedSchemas {
    pub input: InputSchema,
    pub output: SchemaNode,
    pub injections: Vec<InjectionDescriptor>,
}

/// Derive the input schema, output schema and injection list for a signature.
///
/// A parameter without a default is required, except that an optional-typed
/// parameter (`Option<T>`) with no declared default is treated as defaulting to null.
pub fn derive_schemas(signature: &Signature) -> DerivedSchemas {
    let mut input = InputSchema::default();
    let mut injections = Vec::new();

    for param in signature.params.iter().filter(|p| !p.receiver) {
        if let Some(marker) = &param.inject {
            injections.push(InjectionDescriptor {
                parameter: param.name.clone(),
                context_key: marker.key.clone(),
                required: marker.required,
                expected_type: schema_for(&param.hint).kind,
            });
            continue;
        }

        let mut node = schema_for(&param.hint);
        match &param.default {
            ParamDefault::Required if !param.hint.is_optional() => {
                input.required.push(param.name.clone());
            }
            ParamDefault::Value(value) => node.default = Some(value.clone()),
            ParamDefault::Required | ParamDefault::Null => {}
        }
        input.properties.push((param.name.clone(), node));
    }

    let output = signature
        .returns
        .as_ref()
        .map(schema_for)
        .unwrap_or_default();

    DerivedSchemas {
        input,
        output,
        injections,
    }
}
