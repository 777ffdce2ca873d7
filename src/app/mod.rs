pub mod course_store;
pub mod gate;
pub mod locks;
pub mod model;
pub mod progress;
pub mod runner;
