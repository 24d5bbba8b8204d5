#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = grading_orchestrator::run().await {
        eprintln!("grading-orchestrator fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
