pub mod prelude;

pub mod file_sets;
pub mod files;
