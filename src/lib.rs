//! syscheck library exports

pub mod catalog;
pub mod dispatch;
pub mod elevation;
pub mod logbook;
pub mod runner;
pub mod settings;
