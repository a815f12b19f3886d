mod app;
mod tcp;

pub use app::{Application, RunningGateway};
pub use tcp::{Protocol, TcpServer, DRAIN_GRACE};
