#[tokio::main]
async fn main() {
    if let Err(e) = pluto_channels_lib::run().await {
        eprintln!("[pluto-channels] fatal: {e}");
        std::process::exit(1);
    }
}
