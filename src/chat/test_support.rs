//! Helpers shared by unit tests.

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

pub(crate) fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        // keep third-party crates quiet
        let filter_layer = EnvFilter::new("info,chat_sync_core=debug,sqlx=warn,reqwest=info");

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}
