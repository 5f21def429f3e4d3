pub mod assembler;
pub mod filter;
pub mod params;

pub use assembler::{Query, Visibility};
pub use filter::{FilterCompiler, FilterError, Operator, Predicate};
pub use params::{FilterParams, FilterQuery, Pagination};
