use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use hexagon_host::*;

async fn run(engine: &Path, bin_prefix: &Path, config: &HostConfig) -> anyhow::Result<()> {
    let engine_wasm =
        std::fs::read(engine).with_context(|| format!("read engine {}", engine.display()))?;
    let master_path = bin_prefix.join("module.cfg");
    let master = std::fs::read(&master_path)
        .with_context(|| format!("read master module {}", master_path.display()))?;

    let host = Host::initialize(&engine_wasm, config)?;
    let program = host.load_program(&master, DirLoader::new(bin_prefix))?;

    if let Err(err) = program.prewarm(0).await {
        log::warn!("{err}; function 0 stays interpreted");
    }
    program.run()?;
    println!("{}", program.get_global(0)?);

    program.destroy()?;
    host.teardown()?;
    Ok(())
}

#[argopt::cmd]
fn main(
    /// Engine module implementing the bytecode executor
    #[opt(long, default_value = "engine.wasm")]
    engine: PathBuf,
    /// Wasm stack limit in bytes
    #[opt(long)]
    max_stack: Option<usize>,
    /// Disable Cranelift optimizations
    #[opt(long)]
    compile_fast: bool,
    /// Directory holding `module.cfg` and `<fn_id>.wasm` files
    bin_prefix: PathBuf,
) -> anyhow::Result<()> {
    env_logger::builder()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let mut config = HostConfig::from_env();
    if let Some(max_stack) = max_stack {
        config.max_wasm_stack = max_stack;
    }
    config.compile_fast |= compile_fast;

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(run(&engine, &bin_prefix, &config))
}
