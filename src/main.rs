#[tokio::main]
async fn main() -> std::io::Result<()> {
    game_engine::run_with_config().await
}
