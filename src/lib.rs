//! Steady-state heat flow through a rectangular plate with a rectangular
//! hole, solved with the finite element method.

pub mod datatypes;
pub mod error;
pub mod fem;
pub mod jobs;
pub mod mesher;
pub mod model;
pub mod post_processor;
pub mod report;
pub mod solver;
