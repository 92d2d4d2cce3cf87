pub mod junit;
pub mod run_dir;

pub use junit::JunitReporter;
pub use run_dir::RunDirectory;
