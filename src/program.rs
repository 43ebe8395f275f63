use std::rc::{Rc, Weak};

use wasmtime::Module;

use crate::bridge::{self, CompiledFunction, ContextSlots, GlobalSlots, Status};
use crate::cache::{CacheState, CompileCache};
use crate::error::{HostError, Result};
use crate::executor::Handle;
use crate::host::HostInner;
use crate::loader::FunctionLoader;
use crate::{FunctionId, GlobalId, ProgramId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgramStats {
    /// Dispatches answered with `NOT_READY`.
    pub not_ready: u64,
    /// Dispatches that ran a compiled function.
    pub executed: u64,
    pub compiled: u64,
    pub failed: u64,
}

impl ProgramStats {
    fn report(&self, id: ProgramId) {
        log::info!("Program {id} dispatch profile:");
        log::info!("  Interpreted: {}", self.not_ready);
        log::info!("  Executed:    {}", self.executed);
        log::info!("  Compiled:    {}", self.compiled);
        log::info!("  Failed:      {}", self.failed);
    }
}

pub(crate) struct ProgramState {
    pub context: Handle,
    pub cache: CompileCache<CompiledFunction>,
    pub loader: Rc<dyn FunctionLoader>,
    pub stats: ProgramStats,
}

impl ProgramState {
    pub fn new(context: Handle, loader: Rc<dyn FunctionLoader>) -> Self {
        Self {
            context,
            cache: CompileCache::default(),
            loader,
            stats: ProgramStats::default(),
        }
    }
}

/// Handle to a program registered in a [`Host`](crate::Host).
///
/// All state lives in the host; the handle only carries the program id, so a
/// torn down host turns every call into [`HostError::TornDown`].
pub struct Program {
    id: ProgramId,
    host: Weak<HostInner>,
}

impl Program {
    pub(crate) fn new(id: ProgramId, host: Weak<HostInner>) -> Self {
        Self { id, host }
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    fn host(&self) -> Result<Rc<HostInner>> {
        self.host.upgrade().ok_or(HostError::TornDown)
    }

    pub fn run(&self) -> Result<()> {
        let host = self.host()?;
        let mut store = host.store()?;
        let executor = store.data().executor()?;
        let ctx = store.data().program(self.id)?.context;
        log::info!("running program {}", self.id);
        executor.context_run(&mut *store, ctx)
    }

    /// Same as the executor asking for `fn_id` through its callback.
    pub fn invoke(&self, fn_id: FunctionId) -> Result<Status> {
        let host = self.host()?;
        let mut store = host.store()?;
        bridge::dispatch(&mut *store, fn_id, self.id)
    }

    pub fn get_global(&self, id: GlobalId) -> Result<f64> {
        let host = self.host()?;
        let mut store = host.store()?;
        let ctx = store.data().program(self.id)?.context;
        let mut slots = ContextSlots::new(&mut *store, ctx);
        slots.load_global(id)
    }

    pub fn set_global(&self, id: GlobalId, value: f64) -> Result<()> {
        let host = self.host()?;
        let mut store = host.store()?;
        let ctx = store.data().program(self.id)?.context;
        let mut slots = ContextSlots::new(&mut *store, ctx);
        slots.store_global(id, value)
    }

    pub fn cache_state(&self, fn_id: FunctionId) -> Result<CacheState> {
        let host = self.host()?;
        let store = host.store()?;
        Ok(store.data().program(self.id)?.cache.state(fn_id))
    }

    pub fn stats(&self) -> Result<ProgramStats> {
        let host = self.host()?;
        let store = host.store()?;
        Ok(store.data().program(self.id)?.stats)
    }

    /// Compiles `fn_id` now instead of waiting for the executor to ask for it,
    /// then drives every other queued compile to completion as well.
    ///
    /// Only an absent entry is compiled; a failure is returned here and leaves
    /// the entry failed, exactly as a background compile would.
    pub async fn prewarm(&self, fn_id: FunctionId) -> Result<()> {
        let host = self.host()?;
        let loader = {
            let mut store = host.store()?;
            let program = store.data_mut().program_mut(self.id)?;
            program.cache.begin(fn_id).then(|| program.loader.clone())
        };
        let result = match loader {
            Some(loader) => {
                host.local
                    .run_until(compile(&self.host, self.id, fn_id, &*loader))
                    .await
            }
            None => Ok(()),
        };
        host.settle().await;
        result
    }

    pub fn destroy(self) -> Result<()> {
        let host = self.host()?;
        let mut store = host.store()?;
        let executor = store.data().executor()?;
        let program = store
            .data_mut()
            .programs
            .remove(&self.id)
            .ok_or(HostError::IntegrityViolation { program_id: self.id })?;
        program.stats.report(self.id);
        executor.context_destroy(&mut *store, program.context)?;
        log::info!("destroyed program {}", self.id);
        Ok(())
    }
}

pub(crate) async fn compile_in_background(
    host: Weak<HostInner>,
    program_id: ProgramId,
    fn_id: FunctionId,
    loader: Rc<dyn FunctionLoader>,
) {
    if let Err(err) = compile(&host, program_id, fn_id, &*loader).await {
        log::warn!("program {program_id}: {err}");
    }
}

/// Settles a `Pending` entry. A program destroyed in the meantime (ids are
/// never reused) or a torn down host makes the outcome a no-op.
async fn compile(
    host: &Weak<HostInner>,
    program_id: ProgramId,
    fn_id: FunctionId,
    loader: &dyn FunctionLoader,
) -> Result<()> {
    let fetched = fetch(host, fn_id, loader).await;

    let Some(inner) = host.upgrade() else {
        log::debug!("host gone before function {fn_id} finished compiling");
        return Ok(());
    };
    let mut store = inner.store()?;
    let Some(ctx) = store.data().programs.get(&program_id).map(|p| p.context) else {
        log::debug!("program {program_id} destroyed while compiling function {fn_id}");
        return Ok(());
    };
    let outcome = fetched.and_then(|module| {
        bridge::instantiate(&mut *store, &module, ctx)
            .map_err(|err| HostError::compilation(fn_id, err))
    });

    let program = store.data_mut().program_mut(program_id)?;
    match outcome {
        Ok(compiled) => {
            program.cache.complete(fn_id, compiled);
            program.stats.compiled += 1;
            log::info!("program {program_id}: function {fn_id} compiled");
            Ok(())
        }
        Err(err) => {
            program.cache.fail(fn_id);
            program.stats.failed += 1;
            Err(err)
        }
    }
}

async fn fetch(
    host: &Weak<HostInner>,
    fn_id: FunctionId,
    loader: &dyn FunctionLoader,
) -> Result<Module> {
    let bytes = loader
        .load(fn_id)
        .await
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| HostError::compilation(fn_id, anyhow::anyhow!("loader returned no data")))?;

    let engine = host.upgrade().ok_or(HostError::TornDown)?.engine.clone();
    tokio::task::spawn_blocking(move || Module::new(&engine, &bytes))
        .await
        .map_err(|err| HostError::compilation(fn_id, err))?
        .map_err(|err| HostError::compilation(fn_id, err))
}
