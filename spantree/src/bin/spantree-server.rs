use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use spantree::{logging, ServerConfig, ServerContext};

static CANCEL: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_sigint(_sig: libc::c_int) {
    // Only the async-signal-safe store; the multiplexer notices at
    // its next poll timeout.
    if let Some(flag) = CANCEL.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

fn main() -> Result<()> {
    logging::init_default();

    let mut config = ServerConfig::default();
    if let Some(addr) = std::env::args().nth(1) {
        config.addr = addr
            .parse()
            .with_context(|| format!("invalid listen address: {addr}"))?;
    }

    let mut context = ServerContext::bind(config).context("failed to bind server")?;
    info!(addr = %context.local_addr(), "spantree server listening");

    let _ = CANCEL.set(context.cancel_handle());
    let handler = on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }

    context.run().context("multiplexer loop failed")?;
    context.shutdown().context("shutdown failed")?;
    Ok(())
}
