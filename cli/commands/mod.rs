pub mod context;
pub mod generate;
pub mod scan;
pub mod search;
