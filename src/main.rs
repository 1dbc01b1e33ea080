// src/main.rs
#[tokio::main]
async fn main() {
    livepoll::start_server().await;
}
