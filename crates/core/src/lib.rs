// Toolforge Core
//
// Tool contracts and the pieces every execution backend shares.
//
// Key design decisions:
// - Tools are declared through `ToolDescriptor::builder`, which derives the
//   input/output schemas and injection list from typed parameter declarations
// - The registry is an explicit object (`Arc<ToolRegistry>`), never a global
// - Injection resolution and result types live here so the direct and durable
//   backends produce identical failures for identical inputs

pub mod descriptor;
pub mod execution;
pub mod handler;
pub mod injection;
pub mod registry;
pub mod schema;

pub use descriptor::{
    DescriptorError, ToolDescriptor, ToolDescriptorBuilder, ToolRetryPolicy, DEFAULT_TIMEOUT,
};
pub use execution::{ErrorKind, ExecutionRequest, ExecutionResult};
pub use handler::{Arguments, ToolArgs, ToolHandler};
pub use injection::{resolve_injections, InjectionDescriptor, InjectionError};
pub use registry::{RegistryError, ToolRegistry};
pub use schema::{
    derive_schemas, schema_for, DerivedSchemas, DescribeType, InjectMarker, InputSchema, JsonType,
    ParamDefault, ParamSpec, SchemaItems, SchemaNode, Signature, TypeHint,
};
