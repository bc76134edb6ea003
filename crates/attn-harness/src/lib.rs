//! Operational infrastructure shared by the daemon's background tasks:
//! coordinated graceful shutdown.

pub mod shutdown;
