//! Document state and editing operations (UI-agnostic).

mod io;
mod ops;
mod state;

pub use ops::parse_cell_ref;
pub use state::{DEFAULT_SHEET_NAME, Document};
