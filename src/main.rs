//! mcpgw CLI - MCP gateway
//!
//! Run with: cargo run --bin mcpgw -- <command>
//! Or after build: ./target/release/mcpgw <command>

#[tokio::main]
async fn main() {
    // .env is optional; real deployments use the environment directly
    let _ = dotenvy::dotenv();

    mcpgw::init_logging();

    if let Err(e) = mcpgw::cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
