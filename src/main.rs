//! blob-dedup-rs: deduplicating blob store with an admin API for garbage
//! collection.

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use blob_dedup_rs::{Args, BlobServer, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Parse command-line arguments
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug {
        Level::DEBUG
    } else if args.silent {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Invalid generation settings fail here, before anything is served.
    let config = Config::try_from(args)?;

    let server = BlobServer::new(config).await?;

    println!(
        r#"
Blob store admin API is starting at {}

Collect unreferenced blobs:
  curl -X DELETE '{}/blobs?scope=unreferenced'

Press Ctrl+C to stop the server.
"#,
        server.bind_address(),
        server.base_url()
    );

    server.run().await
}
