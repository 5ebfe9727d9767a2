/// Record a statistics event.
///
/// Expands to a call into [`crate::stats`]; compiles to nothing (including
/// the argument expressions) when the `stats` feature is disabled.
///
/// ```ignore
/// stat!(add_requested(size));
/// stat!(inc_slab_in_use());
/// ```
#[macro_export]
macro_rules! stat {
    ($f:ident($($arg:expr),*)) => {
        #[cfg(feature = "stats")]
        {
            $crate::stats::$f($($arg),*);
        }
    };
}
