// Log lines carry the producing instance as a prefix, e.g. `[relay-1] started`.
macro_rules! log_debug {
    ($instance:expr, $($arg:tt)*) => ({
        log::debug!("[{}] {}", $instance, format_args!($($arg)*));
    })
}

macro_rules! log_info {
    ($instance:expr, $($arg:tt)*) => ({
        log::info!("[{}] {}", $instance, format_args!($($arg)*));
    })
}

macro_rules! log_warn {
    ($instance:expr, $($arg:tt)*) => ({
        log::warn!("[{}] {}", $instance, format_args!($($arg)*));
    })
}

macro_rules! log_error {
    ($instance:expr, $($arg:tt)*) => ({
        log::error!("[{}] {}", $instance, format_args!($($arg)*));
    })
}
