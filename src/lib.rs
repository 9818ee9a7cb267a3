pub mod conditional;
pub mod context;
pub mod counter_state;
pub mod error;
pub mod generation_service;
pub mod metrics;
pub mod number_assembler;
pub mod pattern_template;
pub mod redis_sequence_store;
pub mod reset_strategy;
pub mod sequence_config;
pub mod sequence_store;
pub mod settings;
pub mod validation_result;
pub mod validation_service;
pub mod variable_registry;
pub mod variables;

pub use conditional::{BlockConditionalProcessor, ConditionalProcessor};
pub use context::GenerationContext;
pub use counter_state::{CounterState, GeneratedNumber};
pub use error::{GeneratorError, StorageError};
pub use generation_service::{GenerationService, RemainingUntilReset};
pub use metrics::GeneratorMetrics;
pub use number_assembler::{NumberAssembler, PatternEvaluator};
pub use pattern_template::{PatternTemplate, VariableToken};
pub use redis_sequence_store::RedisSequenceStore;
pub use reset_strategy::{CalendarResetStrategy, ResetStrategy};
pub use sequence_config::{ResetPeriod, SequenceConfig, SequenceKey};
pub use sequence_store::{InMemorySequenceStore, ResetOutcome, SequenceStore};
pub use settings::{ConfigError, GeneratorSettings};
pub use validation_result::ValidationResult;
pub use validation_service::{ValidationOptions, ValidationService};
pub use variable_registry::{
    CustomVariable, FnVariable, InMemoryVariableRegistry, RegistryError, TimestampVariable,
    VariableRegistry,
};
pub use variables::BuiltinVariable;
