// Dynamic field catalog and validation
//
// Steps declare which catalog fields they need through `checkFields`; the
// catalog resolves select options and the validator turns raw submitted JSON
// into typed values before any transition that completes a step.

pub mod catalog;
pub mod types;
pub mod validator;

pub use catalog::{FieldCatalog, DEFAULT_STATUS_OPTIONS};
pub use types::{
    FieldDefinition, FieldKind, FieldTag, FieldValue, OptionContext, OptionSource, SelectOption,
};
pub use validator::{FailureReason, FieldFailure, StepContext, StepFieldValidator, ValidationResult};
