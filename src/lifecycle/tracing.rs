//! # Logging Setup
//!
//! [`setup_tracing`] installs a compact `tracing-subscriber` formatter for the
//! whole process. Module prefixes are hidden (`with_target(false)`); the
//! structured fields (`order_id`, `message_id`, `client`, ...) carry the
//! context instead.
//!
//! ## Filtering
//!
//! `RUST_LOG` wins when set. Otherwise the level from `log.level` in the
//! configuration applies.
//!
//! ```bash
//! # Workflow milestones only
//! RUST_LOG=info cargo run
//!
//! # Broker scheduling, batch dispatch and store requests
//! RUST_LOG=debug cargo run
//!
//! # Only the consumer
//! RUST_LOG=delayed_cancel::consumer=debug cargo run
//! ```
//!
//! ## Workflow Trace Example
//!
//! With `RUST_LOG=info`, one order going through the full delay:
//!
//! ```text
//! INFO create_order: Created id=order_1 order_sn="20240101120000000001" size=1
//! INFO create_order:send_sync: Message sent message_id="6F1C..." attempt=1
//! INFO create_order: Order created order_id=order_1 delay=10s
//! INFO Reporting span span="create_order" trace_id=... parent_id=None
//! INFO Cancelled id=order_1
//! INFO Unpaid order cancelled order_id=order_1
//! INFO Reporting span span="del_order" trace_id=... parent_id=Some(...)
//! ```
//!
//! The two `Reporting span` lines share a `trace_id`; the `del_order` span names
//! the `create_order` span as its parent.

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber.
///
/// Returns `false` if one was already installed (for example by an earlier
/// test), which is harmless.
pub fn setup_tracing(default_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .is_ok()
}
