pub mod file_record;
pub mod proposal;
pub mod summary;
