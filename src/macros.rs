#![allow(unused_macros)]

// Log through `defmt` when it is enabled, otherwise through the `log` facade.
// Format strings must stay within the subset both understand (`{}`, `{:?}`).

#[cfg(feature = "defmt")]
macro_rules! twr_log {
    (trace, $($arg:expr),*) => { defmt::trace!($($arg),*) };
    (debug, $($arg:expr),*) => { defmt::debug!($($arg),*) };
    (info,  $($arg:expr),*) => { defmt::info!($($arg),*) };
    (warn,  $($arg:expr),*) => { defmt::warn!($($arg),*) };
    (error, $($arg:expr),*) => { defmt::error!($($arg),*) };
}

#[cfg(all(feature = "log", not(feature = "defmt")))]
macro_rules! twr_log {
    (trace, $($arg:expr),*) => { log::trace!($($arg),*) };
    (debug, $($arg:expr),*) => { log::debug!($($arg),*) };
    (info,  $($arg:expr),*) => { log::info!($($arg),*) };
    (warn,  $($arg:expr),*) => { log::warn!($($arg),*) };
    (error, $($arg:expr),*) => { log::error!($($arg),*) };
}

#[cfg(not(any(feature = "log", feature = "defmt")))]
macro_rules! twr_log {
    ($level:ident, $($arg:expr),*) => {{ $( let _ = &$arg; )* }};
}

macro_rules! twr_trace {
    ($($arg:expr),*) => (twr_log!(trace, $($arg),*));
}

macro_rules! twr_debug {
    ($($arg:expr),*) => (twr_log!(debug, $($arg),*));
}

macro_rules! twr_info {
    ($($arg:expr),*) => (twr_log!(info, $($arg),*));
}

macro_rules! twr_warn {
    ($($arg:expr),*) => (twr_log!(warn, $($arg),*));
}

macro_rules! twr_error {
    ($($arg:expr),*) => (twr_log!(error, $($arg),*));
}
