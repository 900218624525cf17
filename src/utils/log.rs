//! Component-tagged logging macros.
//!
//! Call sites read `log_info!("ControlChannel", "negotiated {}", version)`.
//! Events go to whatever `tracing` subscriber the host application installs;
//! with none installed they are discarded.

macro_rules! log_debug {
    ($component:expr, $($arg:tt)+) => {
        ::tracing::debug!(component = $component, $($arg)+)
    };
}

macro_rules! log_info {
    ($component:expr, $($arg:tt)+) => {
        ::tracing::info!(component = $component, $($arg)+)
    };
}

macro_rules! log_warn {
    ($component:expr, $($arg:tt)+) => {
        ::tracing::warn!(component = $component, $($arg)+)
    };
}

macro_rules! log_error {
    ($component:expr, $($arg:tt)+) => {
        ::tracing::error!(component = $component, $($arg)+)
    };
}

pub(crate) use {log_debug, log_error, log_info, log_warn};
