pub mod logging;
pub mod supervision;
