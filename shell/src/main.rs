use shellax::Interpreter;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // SHELLAX_LOG=debug shows parsing, dispatch and forks on stderr
    let filter = EnvFilter::try_from_env("SHELLAX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    Interpreter::default().repl()
}
