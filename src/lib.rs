//! Whole-program alias/pointer/value-flow analysis for C/C++ SSA IR. The
//! core consumes a module through the read-only traits in `ir`, runs one or
//! more of the engines in `tpa`/`andersen`, and exposes their results
//! through the `alias`/`vfg`/`gvfa` query façades. `checkers` layers a
//! handful of bug detectors on top of `gvfa`.

pub mod alias;
pub mod andersen;
pub mod callgraph;
pub mod cfg;
pub mod checkers;
pub mod context;
pub mod env_store;
pub mod error;
pub mod external_table;
pub mod gvfa;
pub mod initializer;
pub mod ir;
pub mod memory;
pub mod pointer;
pub mod program_point;
pub mod ptset;
pub mod testkit;
pub mod tpa;
pub mod transfer;
pub mod value_origin;
pub mod vfg;

pub use error::{PtaError, Result};
