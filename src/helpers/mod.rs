pub mod command;
pub mod signal;
pub mod sudo;
