pub mod config;
pub mod dap;
pub mod debugger;
pub mod error;
pub mod script;
pub mod ui;
