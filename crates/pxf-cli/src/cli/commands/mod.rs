//! One handler per subcommand.

mod completions;
mod run;
mod start;
mod status;
mod stop;

pub use completions::run_completions;
pub use run::run_scheduler;
pub use start::run_start;
pub use status::run_status;
pub use stop::run_stop;
