pub mod events;
pub mod model;
pub mod signatures;
