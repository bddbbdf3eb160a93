use std::sync::OnceLock;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LOG_FILTER_VAR;
use crate::kernel::KernelContext;
use crate::vk::dispatch::{DeviceDispatchTable, InstanceDispatchTable};

pub type LayerKernel = KernelContext<InstanceDispatchTable, DeviceDispatchTable>;

static KERNEL_CONTEXT: OnceLock<LayerKernel> = OnceLock::new();

/// Acquire a handle to the process-wide kernel, initializing it and the layer's log output
/// the first time it is called.
pub fn acquire() -> &'static LayerKernel {
    KERNEL_CONTEXT.get_or_init(|| {
        init_logging();
        info!("initializing layer kernel");
        KernelContext::new()
    })
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_env(LOG_FILTER_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));

    // A host that installed its own subscriber keeps it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
