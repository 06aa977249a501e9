//! Shared plumbing for the modelport command line: parameter loading,
//! synthetic tensors, terminal formatting, and the JSON graph exporter.

#[macro_use]
extern crate log;

pub mod export;
pub mod params;
pub mod tensor;
pub mod terminal;
