//! OS-level process and port primitives used by the subprocess harness.

pub mod process;

pub use process::{free_port, pid_is_alive, port_available, port_available_on, signal_kill, signal_terminate};
