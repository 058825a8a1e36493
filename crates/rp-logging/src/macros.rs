//! ---
//! rp_section: "03-logging"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Context-enriched logging macros."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
//! Logging macros that attach a [`LogContext`](crate::LogContext) to every event.

#[doc(hidden)]
#[macro_export]
macro_rules! __rp_event {
    ($level:expr, context = $ctx:expr, $($arg:tt)+) => {{
        let ctx: &$crate::LogContext<'_> = &$ctx;
        tracing::event!(
            $level,
            cluster = ctx.cluster.unwrap_or(""),
            worker = ctx.worker.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($level:expr, $($arg:tt)+) => {{
        $crate::__rp_event!($level, context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit an informational log enriched with cluster context.
#[macro_export]
macro_rules! rp_info {
    ($($arg:tt)+) => { $crate::__rp_event!(tracing::Level::INFO, $($arg)+) };
}

/// Emit a warning enriched with cluster context.
#[macro_export]
macro_rules! rp_warn {
    ($($arg:tt)+) => { $crate::__rp_event!(tracing::Level::WARN, $($arg)+) };
}

/// Emit a debug log enriched with cluster context.
#[macro_export]
macro_rules! rp_debug {
    ($($arg:tt)+) => { $crate::__rp_event!(tracing::Level::DEBUG, $($arg)+) };
}

/// Emit an error log enriched with cluster context.
#[macro_export]
macro_rules! rp_error {
    ($($arg:tt)+) => { $crate::__rp_event!(tracing::Level::ERROR, $($arg)+) };
}
