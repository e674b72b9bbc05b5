pub mod file_sets;
pub mod health;
