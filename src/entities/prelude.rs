pub use super::file_sets::Entity as FileSets;
pub use super::files::Entity as Files;
