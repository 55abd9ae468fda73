//! Background removal worker server binary

#[cfg(feature = "cli")]
use bgremove_worker::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("bgremove-server requires the 'cli' feature");
    std::process::exit(1);
}
