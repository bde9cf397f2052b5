pub mod combine_request;
pub mod combine_spec;
pub mod ir;
pub mod relation;
pub mod topology;

pub use combine_request::*;
pub use combine_spec::*;
pub use ir::*;
pub use relation::*;
