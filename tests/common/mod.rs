#![allow(dead_code)]

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use hexagon_host::{FunctionId, FunctionLoader, Host, HostConfig};

/// A stand-in executor. Bytecode is `"HX" fn_id fallback bias ...`:
/// running it asks the host for `fn_id`, and when the answer is NOT_READY
/// it "interprets" the function by storing `fmod(fallback, 100)` in global 0.
/// A non-zero `bias` corrupts the program id passed to the callback.
/// Byte 5 set to `T` traps the load, set to `F` traps the scratch free.
/// Frees and context destroys are counted at addresses 0 and 4.
pub const ENGINE_WAT: &str = r#"
(module
  (import "env" "hexagon_external_global_invoke_callback"
    (func $invoke (param i32 i32 i32) (result i32)))
  (import "env" "fmod" (func $fmod (param f64 f64) (result f64)))
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 1024))

  (func $alloc (export "hexagon_glue_alloc") (param $len i32) (result i32)
    (local $ptr i32)
    (local $end i32)
    (local.set $ptr (global.get $heap))
    (local.set $end
      (i32.and
        (i32.add (i32.add (local.get $ptr) (local.get $len)) (i32.const 7))
        (i32.const -8)))
    (if (i32.gt_u (local.get $end) (i32.const 65536))
      (then (return (i32.const 0))))
    (global.set $heap (local.get $end))
    (local.get $ptr))

  (func (export "hexagon_glue_free") (param $ptr i32)
    (if (i32.eq (i32.load8_u offset=5 (local.get $ptr)) (i32.const 70))
      (then unreachable))
    (i32.store (i32.const 0) (i32.add (i32.load (i32.const 0)) (i32.const 1))))

  (func (export "hexagon_executor_create") (result i32)
    (i32.const 16))

  (func (export "hexagon_executor_destroy") (param i32))

  (func (export "hexagon_executor_load_program")
    (param $exec i32) (param $code i32) (param $len i32) (param $user i32) (param $reserved i32)
    (result i32)
    (local $ctx i32)
    (if (i32.lt_u (local.get $len) (i32.const 5))
      (then (return (i32.const 0))))
    (if (i32.ne (i32.load8_u (local.get $code)) (i32.const 72))
      (then (return (i32.const 0))))
    (if (i32.ne (i32.load8_u offset=1 (local.get $code)) (i32.const 88))
      (then (return (i32.const 0))))
    (if (i32.eq (i32.load8_u offset=5 (local.get $code)) (i32.const 84))
      (then unreachable))
    (local.set $ctx (call $alloc (i32.const 144)))
    (if (i32.eqz (local.get $ctx))
      (then (return (i32.const 0))))
    (i32.store (local.get $ctx)
      (i32.add
        (local.get $user)
        (i32.mul (i32.load8_u offset=4 (local.get $code)) (i32.const 1000))))
    (i32.store offset=4 (local.get $ctx) (local.get $exec))
    (i32.store offset=8 (local.get $ctx) (i32.load8_u offset=2 (local.get $code)))
    (i32.store offset=12 (local.get $ctx) (i32.load8_u offset=3 (local.get $code)))
    (local.get $ctx))

  (func (export "hexagon_context_destroy") (param i32)
    (i32.store (i32.const 4) (i32.add (i32.load (i32.const 4)) (i32.const 1))))

  (func $slot (param $ctx i32) (param $id i32) (result i32)
    (i32.add
      (i32.add (local.get $ctx) (i32.const 16))
      (i32.shl (local.get $id) (i32.const 3))))

  (func $get (export "hexagon_context_get_global") (param $ctx i32) (param $id i32) (result f64)
    (f64.load (call $slot (local.get $ctx) (local.get $id))))

  (func $set (export "hexagon_context_set_global") (param $ctx i32) (param $id i32) (param $v f64)
    (f64.store (call $slot (local.get $ctx) (local.get $id)) (local.get $v)))

  (func (export "hexagon_context_run") (param $ctx i32)
    (if (i32.eqz
          (call $invoke
            (i32.load offset=4 (local.get $ctx))
            (i32.load offset=8 (local.get $ctx))
            (i32.load (local.get $ctx))))
      (then
        (call $set (local.get $ctx) (i32.const 0)
          (call $fmod
            (f64.convert_i32_u (i32.load offset=12 (local.get $ctx)))
            (f64.const 100))))))
)
"#;

/// Stores 42 in global 0 and counts its own executions in global 1.
pub const STORE_42: &str = r#"
(module
  (import "env" "load_global" (func $load (param i32) (result f64)))
  (import "env" "store_global" (func $store (param i32 f64)))
  (func (export "main")
    (call $store (i32.const 0) (f64.const 42))
    (call $store (i32.const 1)
      (f64.add (call $load (i32.const 1)) (f64.const 1)))))
"#;

/// Doubles global 0 into global 2.
pub const DOUBLE_0_INTO_2: &str = r#"
(module
  (import "env" "load_global" (func $load (param i32) (result f64)))
  (import "env" "store_global" (func $store (param i32 f64)))
  (func (export "main")
    (call $store (i32.const 2)
      (f64.mul (call $load (i32.const 0)) (f64.const 2)))))
"#;

pub const FOREIGN_IMPORT: &str = r#"
(module
  (import "env" "print" (func $print (param i32)))
  (func (export "main")))
"#;

pub const NO_ENTRY: &str = r#"
(module
  (func (export "start")))
"#;

pub fn host() -> Host {
    Host::initialize(ENGINE_WAT.as_bytes(), &HostConfig::default()).unwrap()
}

/// Same engine, but its callback passes a handle one past its own.
pub fn host_with_foreign_handle() -> Host {
    let wat = ENGINE_WAT.replace(
        "(i32.load offset=4 (local.get $ctx))",
        "(i32.add (i32.load offset=4 (local.get $ctx)) (i32.const 1))",
    );
    Host::initialize(wat.as_bytes(), &HostConfig::default()).unwrap()
}

/// `(frees, context destroys)` recorded by the engine so far.
pub fn engine_counters(host: &Host) -> (u32, u32) {
    host.with_arena(|arena, store| {
        let bytes = arena.read(&store, 0, 8)?;
        let word = |at: usize| u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        Ok((word(0), word(4)))
    })
    .unwrap()
}

/// A 50-byte program asking for `fn_id` when run.
pub fn bytecode(fn_id: u8, fallback: u8) -> Vec<u8> {
    let mut code = vec![b'H', b'X', fn_id, fallback, 0];
    code.resize(50, 0xaa);
    code
}

/// Serves modules from a fixed table and counts how often it is asked.
#[derive(Clone, Default)]
pub struct TableLoader {
    modules: Rc<HashMap<FunctionId, Vec<u8>>>,
    pub calls: Rc<Cell<usize>>,
}

impl TableLoader {
    pub fn new<'a>(modules: impl IntoIterator<Item = (FunctionId, &'a str)>) -> Self {
        Self {
            modules: Rc::new(
                modules
                    .into_iter()
                    .map(|(id, wat)| (id, wat.as_bytes().to_vec()))
                    .collect(),
            ),
            calls: Rc::default(),
        }
    }
}

impl FunctionLoader for TableLoader {
    fn load(&self, fn_id: FunctionId) -> hexagon_host::loader::LoadFuture {
        self.calls.set(self.calls.get() + 1);
        let bytes = self.modules.get(&fn_id).cloned();
        Box::pin(async move { bytes })
    }
}
