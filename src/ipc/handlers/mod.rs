pub mod assignments;
pub mod attendance;
pub mod core;
pub mod directory;
pub mod homeroom;
pub mod notifications;
pub mod session;
