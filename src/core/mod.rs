//! 核心层：采集状态、重试策略、显式状态机、时钟抽象与采集 actor

pub mod clock;
pub mod error;
pub mod machine;
pub mod orchestrator;
pub mod policy;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AgentFailure, FailureClass, TabError};
pub use machine::{CollectionMachine, Effect, EngineEvent, EnginePhase, RunId, Step, Wake};
pub use orchestrator::{spawn_collector, CollectorDeps};
pub use policy::{CollectionPolicy, RetryDecision};
pub use state::{CollectionState, PageRecord, ProgressSnapshot};
