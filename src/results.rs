//! Result containers shared by every provider.

mod row;
mod table;

pub use row::DataRow;
pub use table::{DataReader, DataSet, DataTable};
