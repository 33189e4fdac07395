//! Search engine: result values, the memory evaluator with its word-index and
//! thread helpers, and the router that picks memory or SQL per query.

pub mod dates;
pub mod evaluator;
pub mod result;
pub mod router;
pub mod threads;
pub mod word_index;
pub mod words;

pub use evaluator::Evaluator;
pub use result::{SearchValue, UidSet};
pub use router::{needs_memory, FolderSearch, Route, MATCH_EVERYTHING};
pub use threads::{ThreadMatch, ThreadTree};
pub use word_index::WordIndex;
