pub mod algorithm;
pub mod arg;
pub mod composite;
pub mod cpa;
pub mod location;
pub mod predicate;
pub mod property;
pub mod stack;
pub mod state;
pub mod value;

pub use algorithm::{CpaAlgorithm, RunOutcome};
pub use arg::{ArgCpa, ArgGraph, ArgId, render_arg};
pub use composite::CompositeCpa;
pub use cpa::ConfigurableProgramAnalysis;
pub use location::{LocationCpa, LocationState};
pub use predicate::abe::{AbePredicateCpa, BlockStrategy};
pub use predicate::{Predicate, PredicateCpa, PredicatePrecision};
pub use property::{PropertyCpa, PropertyState};
pub use stack::{StackCpa, StackState};
pub use state::AbstractState;
pub use value::{Value, ValueCpa, ValueState};
