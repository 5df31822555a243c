pub mod admins;
pub mod archives;
pub mod core;
pub mod promotion;
pub mod roster;
pub mod students;
