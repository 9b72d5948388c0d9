//! Process orchestration: agent definitions, the turn state machine, and the
//! handler external schedulers drive.

pub mod definition;
pub mod events;
pub mod handler;
pub mod machine;
pub mod record;
pub mod scheduler;
pub mod worker;

pub use definition::{
    AgentDefinition, AuxiliaryConfig, AuxiliaryPass, ProcessState, Transition, load_definition,
};
pub use events::{EventReceiver, EventSender, ProcessEvent, event_bus};
pub use handler::{
    ModelTurn, ProcessHandler, ProcessHandlerBuilder, ProcessSnapshot, StartOutcome, StepOutcome,
    ToolResult, TurnContext,
};
pub use machine::{Phase, StateMachine};
pub use record::ProcessRecord;
pub use scheduler::{QueueScheduler, Scheduler};
pub use worker::{TurnModel, run_turn, run_worker};
