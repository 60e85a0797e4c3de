pub mod cli;
pub mod controller;
pub mod dependency_graph;
pub mod load_generator;
pub mod probe;
pub mod runner;
pub mod service;
pub mod state_machine;

pub use controller::{
    Collaborators, ControllerError, SessionController, SessionProgress, SessionStatus,
    SuiteRegistry, ValidationError,
};
pub use dependency_graph::{GraphError, SuiteGraph};
pub use load_generator::{
    LoadGenerator, LoadProfile, ScriptedWorkflow, StepFailure, StepOutcome, VirtualUserProbe,
    WorkflowDriver, WorkflowStep,
};
pub use probe::{CommandProbe, FnProbe, Probe, ProbeContext, ProbeReport};
pub use runner::{evaluate_retry, run_unit, RetryDecision, UnitOutcome, UnitPolicy};
pub use service::{MedicService, ServiceError};
pub use state_machine::{
    is_transition_allowed, transition_session, StateMachineError, StateTransition,
};
