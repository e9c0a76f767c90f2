//! The compiled model of a schema and its operations.

mod field_type;
mod fragments;
mod input_value;
pub(crate) mod operation;
mod schema;
mod selection;

pub use field_type::FieldType;
pub(crate) use field_type::apply_input_defaults;
pub(crate) use fragments::Fragments;
pub use input_value::Arguments;
pub use input_value::InputValue;
pub use operation::OperationDefinition;
pub use operation::OperationKind;
pub use operation::VariableDefinition;
pub use schema::EnumDefinition;
pub use schema::FieldDefinition;
pub use schema::InputObjectDefinition;
pub use schema::InputValueDefinition;
pub use schema::InterfaceDefinition;
pub use schema::ObjectDefinition;
pub use schema::ScalarDefinition;
pub use schema::TypeDefinition;
pub use schema::TypeRegistry;
pub use schema::UnionDefinition;
pub(crate) use selection::SelectionCompiler;
pub use selection::compile_selection_set;
pub use selection::CompiledSelection;
pub use selection::Condition;
pub use selection::FieldKind;
pub use selection::IncludeSkip;
pub use selection::QueriedField;
pub use selection::TYPENAME;
