pub mod fs;
pub mod logging;
pub mod pidfile;
pub mod process;
pub mod signals;
pub mod time;
