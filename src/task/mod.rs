pub mod battery_charge_read;
pub mod echo_capture;
pub mod measure;
pub mod record_log;
