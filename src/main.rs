#[tokio::main]
async fn main() {
    if let Err(e) = chapterflow::run().await {
        eprintln!("chapterflow: {e:#}");
        std::process::exit(1);
    }
}
