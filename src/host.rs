use std::cell::{RefCell, RefMut};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use anyhow::Context as _;
use tokio::task::{JoinHandle, LocalSet};
use wasmtime::{AsContextMut, Engine, Linker, Module, Store, StoreContextMut};

use crate::arena::Arena;
use crate::bridge::{self, Status};
use crate::config::HostConfig;
use crate::error::{HostError, Result};
use crate::executor::Executor;
use crate::loader::FunctionLoader;
use crate::program::{self, Program, ProgramState};
use crate::{FunctionId, ProgramId};

/// Owns one executor instance and every program loaded into it.
pub struct Host {
    inner: Rc<HostInner>,
}

pub(crate) struct HostInner {
    pub engine: Engine,
    store: RefCell<Store<HostState>>,
    pub local: LocalSet,
}

/// Data attached to the wasm store; reachable from every callback.
pub struct HostState {
    host: Weak<HostInner>,
    executor: Option<Executor>,
    pub(crate) programs: HashMap<ProgramId, ProgramState>,
    next_id: ProgramId,
    tasks: Vec<JoinHandle<()>>,
}

impl HostState {
    fn new(host: Weak<HostInner>) -> Self {
        Self {
            host,
            executor: None,
            programs: HashMap::new(),
            next_id: 0,
            tasks: Vec::new(),
        }
    }

    pub(crate) fn executor(&self) -> Result<Executor> {
        self.executor.clone().ok_or(HostError::TornDown)
    }

    pub(crate) fn program(&self, id: ProgramId) -> Result<&ProgramState> {
        self.programs
            .get(&id)
            .ok_or(HostError::IntegrityViolation { program_id: id })
    }

    pub(crate) fn program_mut(&mut self, id: ProgramId) -> Result<&mut ProgramState> {
        self.programs
            .get_mut(&id)
            .ok_or(HostError::IntegrityViolation { program_id: id })
    }

    pub(crate) fn spawn_compile(
        &mut self,
        program_id: ProgramId,
        fn_id: FunctionId,
        loader: Rc<dyn FunctionLoader>,
    ) -> Result<()> {
        let host = self.host.upgrade().ok_or(HostError::TornDown)?;
        log::debug!("program {program_id}: scheduling compile of function {fn_id}");
        let task = host.local.spawn_local(program::compile_in_background(
            self.host.clone(),
            program_id,
            fn_id,
            loader,
        ));
        self.tasks.push(task);
        Ok(())
    }
}

impl HostInner {
    pub fn store(&self) -> Result<RefMut<'_, Store<HostState>>> {
        self.store
            .try_borrow_mut()
            .map_err(|_| anyhow::anyhow!("host re-entered while its store is in use").into())
    }

    fn attach(&self, module: &Module) -> anyhow::Result<()> {
        let mut linker = Linker::new(&self.engine);
        bridge::link_engine(&mut linker)?;

        let mut store = self.store.borrow_mut();
        let instance = linker
            .instantiate(&mut *store, module)
            .context("instantiate engine module")?;
        let executor = Executor::create(&mut *store, &instance)?;
        log::info!("executor created (handle {:#x})", executor.handle);
        store.data_mut().executor = Some(executor);
        Ok(())
    }

    pub async fn settle(&self) {
        loop {
            let tasks = match self.store() {
                Ok(mut store) => std::mem::take(&mut store.data_mut().tasks),
                Err(_) => return,
            };
            if tasks.is_empty() {
                return;
            }
            self.local
                .run_until(async move {
                    for task in tasks {
                        if let Err(err) = task.await {
                            log::warn!("compile task aborted: {err}");
                        }
                    }
                })
                .await;
        }
    }

    fn shutdown(&self) -> Result<()> {
        let mut store = self.store()?;
        let state = store.data_mut();
        let Some(executor) = state.executor.take() else {
            return Ok(());
        };
        let programs = state.programs.len();
        state.programs.clear();
        state.tasks.clear();
        executor.destroy(&mut *store)?;
        log::info!("executor destroyed ({programs} programs still registered)");
        Ok(())
    }
}

impl Drop for HostInner {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::warn!("executor teardown failed: {err}");
        }
    }
}

impl Host {
    pub fn initialize(engine_wasm: &[u8], config: &HostConfig) -> Result<Self> {
        let engine = config.build_engine().map_err(HostError::Initialization)?;
        let module = Module::new(&engine, engine_wasm)
            .context("compile engine module")
            .map_err(HostError::Initialization)?;

        let inner = Rc::new_cyclic(|weak| HostInner {
            store: RefCell::new(Store::new(&engine, HostState::new(weak.clone()))),
            engine,
            local: LocalSet::new(),
        });
        inner.attach(&module).map_err(HostError::Initialization)?;

        Ok(Self { inner })
    }

    /// Copies `bytecode` into executor memory and registers the resulting program.
    pub fn load_program(
        &self,
        bytecode: &[u8],
        loader: impl FunctionLoader + 'static,
    ) -> Result<Program> {
        let mut store = self.inner.store()?;
        let executor = store.data().executor()?;
        let id = store.data().next_id;
        let len = bytecode.len();

        let scratch = executor.arena.allocate(&mut *store, len)?;
        let loaded = executor
            .arena
            .write(&mut *store, scratch, bytecode)
            .and_then(|()| executor.load_program(&mut *store, scratch, len, id));
        let freed = executor.arena.free(&mut *store, scratch);
        let context = match (loaded, freed) {
            (Ok(Some(context)), Ok(())) => context,
            (Ok(Some(context)), Err(err)) => {
                executor.context_destroy(&mut *store, context)?;
                return Err(err);
            }
            (Ok(None), freed) => {
                freed?;
                return Err(HostError::Load { len });
            }
            (Err(err), freed) => {
                if let Err(free_err) = freed {
                    log::warn!("scratch buffer {scratch:#x} not freed: {free_err}");
                }
                return Err(err);
            }
        };

        let state = store.data_mut();
        state.next_id += 1;
        state
            .programs
            .insert(id, ProgramState::new(context, Rc::new(loader)));
        log::info!("loaded program {id} ({len} bytes, context {context:#x})");

        Ok(Program::new(id, Rc::downgrade(&self.inner)))
    }

    /// The routine the executor's invoke callback lands in.
    pub fn dispatch_callback(&self, fn_id: FunctionId, program_id: ProgramId) -> Result<Status> {
        let mut store = self.inner.store()?;
        bridge::dispatch(&mut *store, fn_id, program_id)
    }

    /// Drives every outstanding compile task to completion.
    pub async fn settle(&self) {
        self.inner.settle().await
    }

    pub fn with_arena<R>(
        &self,
        f: impl FnOnce(&Arena, StoreContextMut<'_, HostState>) -> Result<R>,
    ) -> Result<R> {
        let mut store = self.inner.store()?;
        let executor = store.data().executor()?;
        f(&executor.arena, store.as_context_mut())
    }

    pub fn program_count(&self) -> usize {
        self.inner
            .store()
            .map_or(0, |store| store.data().programs.len())
    }

    pub fn is_registered(&self, id: ProgramId) -> bool {
        self.inner
            .store()
            .is_ok_and(|store| store.data().programs.contains_key(&id))
    }

    pub fn teardown(self) -> Result<()> {
        self.inner.shutdown()
    }
}
