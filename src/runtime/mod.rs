pub mod blueprint;
pub mod execution;
pub mod routing;
pub mod instance;
pub mod task;
pub mod identity;
pub mod definition;
pub mod storage;
pub mod engine;
