//! 语句执行：协调器、执行器抽象与模拟实现

pub mod coordinator;
pub mod executor;
pub mod generator;
pub mod sim_delegate;
pub mod simulator;

pub use coordinator::{ExecutionCoordinator, ExecutionOutcome};
pub use executor::StatementExecutor;
pub use generator::ResultGenerator;
pub use sim_delegate::SimulatedDelegate;
pub use simulator::{
    SimulatedExecutor, SimulationDatabase, SimulatorOptions, SimulatorState, MORE_SIZE, PAGE_SIZE,
};
