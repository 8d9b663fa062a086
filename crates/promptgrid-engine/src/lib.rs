//! promptgrid_engine - Reference syntax, resolution, generations and formulas.

pub mod engine;
