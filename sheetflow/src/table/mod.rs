//! Table handling: CSV codec, cell normalization, shape checks and local
//! file persistence.

mod codec;
mod file;
mod normalize;
mod shape;

pub use codec::{count_records, parse_rows, rows_to_string};
pub use file::{append_csv, append_lines, read_snapshot, write_snapshot};
pub use normalize::{
    is_marked, mark_text, normalize_for_upload, normalize_percent_cell, NormalizedColumns,
    TEXT_MARKER,
};
pub use shape::{add_date_column, TableShape};
