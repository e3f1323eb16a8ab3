pub mod assignments;
pub mod backup_exchange;
pub mod core;
pub mod faculty;
pub mod internal;
pub mod marks;
pub mod quiz;
pub mod reports;
pub mod students;
