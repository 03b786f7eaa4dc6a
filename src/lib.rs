pub mod api;
pub mod compile;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use compile::{CompileOutcome, CompileSettings, Compiler};
pub use config::Config;
pub use datasource::{ChainDataProvider, DataSourceError, PriceSource};
pub use db::{init_db, Repository};
pub use domain::{
    AccountSnapshot, Address, Cutoff, Decimal, HypervisorStatic, Network, Operation, PoolKind,
    Position, Topic, VaultSnapshot,
};
pub use engine::{EngineError, StatusTransitionEngine};
pub use error::AppError;
pub use orchestration::Orchestrator;
