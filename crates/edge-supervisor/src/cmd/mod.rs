mod block;
mod restart;
mod start;
mod status;

pub use block::{idle, run_block};
pub use restart::{run_restart, running_agent_pid};
pub use start::{StartContext, run_start, supervise};
pub use status::{is_alive, run_status};
