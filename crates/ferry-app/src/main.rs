#![forbid(unsafe_code)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, unused_must_use)]

//! Binary entrypoint: wires the ferry services and drives one command.

use std::process;

/// Runs the requested command and exits with its status.
#[tokio::main]
async fn main() {
    let code = ferry_app::run().await;
    process::exit(code);
}
