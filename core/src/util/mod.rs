/// Formats an action log as "thing → action context".
/// The thing is bold blue, the action green and any trailing context dimmed.
#[macro_export]
#[doc(hidden)]
macro_rules! __action_log {
    ($level:ident, $thing:expr, $action:expr) => {
        tracing::$level!("\x1b[1;34m{}\x1b[0m → \x1b[32m{}\x1b[0m", $thing, $action)
    };
    ($level:ident, $thing:expr, $action:expr, $($arg:tt)+) => {
        tracing::$level!("\x1b[1;34m{}\x1b[0m → \x1b[32m{}\x1b[0m \x1b[2m{}\x1b[0m", $thing, $action, format!($($arg)+))
    };
}

#[macro_export]
macro_rules! action_debug {
    ($($arg:tt)+) => { $crate::__action_log!(debug, $($arg)+) };
}

#[macro_export]
macro_rules! action_info {
    ($($arg:tt)+) => { $crate::__action_log!(info, $($arg)+) };
}

#[macro_export]
macro_rules! action_warn {
    ($($arg:tt)+) => { $crate::__action_log!(warn, $($arg)+) };
}
