//! Flat-file storage primitives.
//!
//! Layout under a store root:
//!
//! ```text
//! <root>/
//!   .lock
//!   queue.json
//!   profile/
//!     index.json
//!     <uri>/
//!       YYYY-MM-DD.json
//!       meta.json
//!       history.csv
//!   list/
//!     index.json
//!     <uri>/YYYY-MM-DD.csv
//! ```

mod flat;
mod lock;

pub use flat::{FlatStore, Table};
pub use lock::StoreLock;
