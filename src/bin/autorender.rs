//! AutoRender CLI tool
//!
//! Runs background removal, background swap and cropping operations from the
//! command line.

#[cfg(feature = "cli")]
use autorender::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
