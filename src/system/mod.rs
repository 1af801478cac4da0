//! Board-level pieces shared by the tasks
pub mod alp_flash;
pub mod event;
pub mod resources;
pub mod state;
pub mod uptime;
