//! Events the pipeline emits about itself.
//!
//! `diag_debug!`, `diag_info!`, `diag_warn!` and `diag_error!` take a static
//! event name followed by `key = value` fields:
//!
//! ```rust
//! use diagnostics::diag_warn;
//! diag_warn!(name: "TracingRecorder.RecordDropped", dropped = 1, reason = "shutdown");
//! ```
//!
//! With the `internal-logs` feature the event goes to `tracing` with the crate
//! name as target. Under `cfg(test)` it is also printed to stdout, visible with
//! `--nocapture`. Each field value is evaluated exactly once and must implement
//! both `tracing::Value` and `Display`.
//!
//! These macros are meant for this crate and for collectors or transports
//! plugged into it, not for application logging.

#[doc(hidden)]
#[macro_export]
macro_rules! __diag_event {
    ($level:ident, name: $name:literal $(, $key:ident = $value:expr)* $(,)?) => {{
        #[allow(clippy::match_single_binding)]
        match ($($value,)*) {
            ($($key,)*) => {
                #[cfg(feature = "internal-logs")]
                $crate::__diag_tracing!($level, $name, [] $($key),*);

                #[cfg(test)]
                println!(
                    concat!("diag_", stringify!($level), ": name={}" $(, ", ", stringify!($key), "={}")*),
                    $name $(, $key)*
                );

                #[cfg(all(not(feature = "internal-logs"), not(test)))]
                let _ = ($($key,)*);
            }
        };
    }};
}

// Re-binds each field to a hygienic local so field names such as `debug` or
// `display` are not shadowed by the imports inside `tracing`'s macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __diag_tracing {
    ($level:ident, $name:literal, [$(($k:ident, $v:ident))*] $key:ident $(, $rest:ident)*) => {{
        let __diag_value = &$key;
        $crate::__diag_tracing!($level, $name, [$(($k, $v))* ($key, __diag_value)] $($rest),*)
    }};
    ($level:ident, $name:literal, [$(($k:ident, $v:ident))*]) => {
        $crate::_private::$level!(
            name: $name,
            target: env!("CARGO_PKG_NAME"),
            name = $name
            $(, $k = $v)*
        )
    };
}

/// Log a debug event from the pipeline.
#[macro_export]
macro_rules! diag_debug {
    ($($args:tt)*) => {
        $crate::__diag_event!(debug, $($args)*)
    };
}

/// Log an informational event from the pipeline.
#[macro_export]
macro_rules! diag_info {
    ($($args:tt)*) => {
        $crate::__diag_event!(info, $($args)*)
    };
}

/// Log a warning from the pipeline.
#[macro_export]
macro_rules! diag_warn {
    ($($args:tt)*) => {
        $crate::__diag_event!(warn, $($args)*)
    };
}

/// Log an error from the pipeline.
#[macro_export]
macro_rules! diag_error {
    ($($args:tt)*) => {
        $crate::__diag_event!(error, $($args)*)
    };
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    #[test]
    fn fields_are_evaluated_once() {
        let calls = Cell::new(0);
        let next = || {
            calls.set(calls.get() + 1);
            calls.get()
        };
        let owned = String::from("moved");

        crate::diag_warn!(name: "Test.Warn", count = next(), value = owned);
        crate::diag_error!(name: "Test.Error", count = next(), reason = format!("{}", 42));
        crate::diag_info!(name: "Test.Info");

        assert_eq!(calls.get(), 2);
    }
}
