//! The two callback channels between the executor, the host and compiled code.
//!
//! Executor to host: `invoke(handle, fn_id, program_id) -> status`.
//! Compiled module to host, only while that module runs: `load_global` and
//! `store_global`, both bound to the owning program's context.

use anyhow::Context as _;
use wasmtime::{AsContextMut, Caller, Extern, Func, Instance, Linker, Module, TypedFunc};

use crate::cache::Lookup;
use crate::error::{HostError, Result};
use crate::executor::{Handle, FMOD, INVOKE_CALLBACK};
use crate::host::HostState;
use crate::{FunctionId, GlobalId, ProgramId};

#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    NotReady = 0,
    Executed = 1,
}

/// Global slot access handed to compiled code for the duration of one call.
pub trait GlobalSlots {
    fn load_global(&mut self, id: GlobalId) -> Result<f64>;
    fn store_global(&mut self, id: GlobalId, value: f64) -> Result<()>;
}

pub(crate) struct ContextSlots<S> {
    store: S,
    ctx: Handle,
}

impl<S: AsContextMut<Data = HostState>> ContextSlots<S> {
    pub fn new(store: S, ctx: Handle) -> Self {
        Self { store, ctx }
    }
}

impl<S: AsContextMut<Data = HostState>> GlobalSlots for ContextSlots<S> {
    fn load_global(&mut self, id: GlobalId) -> Result<f64> {
        let executor = self.store.as_context().data().executor()?;
        let value = executor.get_global(&mut self.store, self.ctx, id)?;
        log::debug!("load_global {id} -> {value}");
        Ok(value)
    }

    fn store_global(&mut self, id: GlobalId, value: f64) -> Result<()> {
        log::debug!("store_global {id} <- {value}");
        let executor = self.store.as_context().data().executor()?;
        executor.set_global(&mut self.store, self.ctx, id, value)
    }
}

/// Entry point of a compiled function, instantiated against one program.
#[derive(Clone)]
pub(crate) struct CompiledFunction {
    entry: TypedFunc<(), ()>,
}

pub(crate) fn link_engine(linker: &mut Linker<HostState>) -> anyhow::Result<()> {
    linker.func_wrap(
        "env",
        INVOKE_CALLBACK,
        |mut caller: Caller<'_, HostState>,
         handle: i32,
         fn_id: i32,
         program_id: i32|
         -> anyhow::Result<i32> {
            let status = invoke(&mut caller, handle as Handle, fn_id as u32, program_id as u32)?;
            Ok(status as i32)
        },
    )?;
    linker.func_wrap("env", FMOD, |a: f64, b: f64| a % b)?;
    Ok(())
}

/// Instantiates a compiled module whose globals live in `ctx`.
pub(crate) fn instantiate(
    mut store: impl AsContextMut<Data = HostState>,
    module: &Module,
    ctx: Handle,
) -> anyhow::Result<CompiledFunction> {
    let mut imports: Vec<Extern> = Vec::new();
    for import in module.imports() {
        let func = match (import.module(), import.name()) {
            ("env", "load_global") => Func::wrap(
                &mut store,
                move |mut caller: Caller<'_, HostState>, id: i32| -> anyhow::Result<f64> {
                    Ok(ContextSlots::new(&mut caller, ctx).load_global(id as GlobalId)?)
                },
            ),
            ("env", "store_global") => Func::wrap(
                &mut store,
                move |mut caller: Caller<'_, HostState>, id: i32, value: f64| -> anyhow::Result<()> {
                    Ok(ContextSlots::new(&mut caller, ctx).store_global(id as GlobalId, value)?)
                },
            ),
            (namespace, name) => anyhow::bail!("unsupported import `{namespace}.{name}`"),
        };
        imports.push(func.into());
    }

    let instance = Instance::new(&mut store, module, &imports)?;
    let entry = instance
        .get_typed_func::<(), ()>(&mut store, "main")
        .context("missing `main` entry point")?;
    Ok(CompiledFunction { entry })
}

fn invoke(
    mut store: impl AsContextMut<Data = HostState>,
    handle: Handle,
    fn_id: FunctionId,
    program_id: ProgramId,
) -> Result<Status> {
    let own = store.as_context().data().executor()?.handle;
    if handle != own {
        return Err(HostError::ForeignExecutor { handle });
    }
    dispatch(&mut store, fn_id, program_id)
}

/// Routes one invocation request to the program's compilation cache.
pub(crate) fn dispatch(
    mut store: impl AsContextMut<Data = HostState>,
    fn_id: FunctionId,
    program_id: ProgramId,
) -> Result<Status> {
    let mut cx = store.as_context_mut();
    let state = cx.data_mut();
    let program = state
        .programs
        .get_mut(&program_id)
        .ok_or(HostError::IntegrityViolation { program_id })?;

    match program.cache.request(fn_id) {
        Lookup::Schedule => {
            program.stats.not_ready += 1;
            let loader = program.loader.clone();
            state.spawn_compile(program_id, fn_id, loader)?;
            Ok(Status::NotReady)
        }
        Lookup::Wait => {
            program.stats.not_ready += 1;
            Ok(Status::NotReady)
        }
        Lookup::Run(compiled) => {
            program.stats.executed += 1;
            log::debug!("AOT execution begin: program {program_id}, function {fn_id}");
            compiled
                .entry
                .call(&mut cx, ())
                .map_err(HostError::from_trap)?;
            log::debug!("AOT execution end: program {program_id}, function {fn_id}");
            Ok(Status::Executed)
        }
    }
}
