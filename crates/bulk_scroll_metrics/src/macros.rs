pub use paste::paste;
pub use prometheus;

/// Register an integer counter against the crate-wide registry and store it
/// in a static. An optional third argument gives label names for a vec
/// counter. The reported metric name is the lower_snake_case of the
/// declared static's name.
#[macro_export]
macro_rules! register_bulk_scroll_counter {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntCounter> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                #[allow(clippy::disallowed_macros)]
                $crate::prometheus::register_int_counter_with_registry!(
                    name,
                    $HELP,
                    $crate::registry()
                )
                .expect("metric registration failed")
            });
    };
    ($VIS:vis $NAME:ident, $HELP:literal, $LABELS:expr $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntCounterVec> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                #[allow(clippy::disallowed_macros)]
                $crate::prometheus::register_int_counter_vec_with_registry!(
                    name,
                    $HELP,
                    $LABELS,
                    $crate::registry()
                )
                .expect("metric registration failed")
            });
    };
}

/// Register a histogram against the crate-wide registry and store it in a
/// static, with an optional third argument for label names.
#[macro_export]
macro_rules! register_bulk_scroll_histogram {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::Histogram> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                #[allow(clippy::disallowed_macros)]
                $crate::prometheus::register_histogram_with_registry!(
                    name,
                    $HELP,
                    $crate::registry()
                )
                .expect("metric registration failed")
            });
    };
    ($VIS:vis $NAME:ident, $HELP:literal, $LABELS:expr $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::HistogramVec> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                #[allow(clippy::disallowed_macros)]
                $crate::prometheus::register_histogram_vec_with_registry!(
                    name,
                    $HELP,
                    $LABELS,
                    $crate::registry()
                )
                .expect("metric registration failed")
            });
    };
}
