#[tokio::main]
async fn main() {
    if let Err(error) = daybook::run().await {
        eprintln!("daybook failed to start: {error}");
        std::process::exit(1);
    }
}
