//! Roster domain: the field catalog and the operations built on it.

mod catalog;
pub mod export;
pub mod progress;
mod search;
mod validate;
mod writer;

pub use catalog::{FieldCatalog, SearchFields};
pub use export::ExportKind;
pub use progress::Progress;
pub use search::SearchCriteria;
pub use validate::missing_required;
pub use writer::{RowWriter, WriteReceipt};
