// CyberBasic Virtual Machine
// Stack-based VM with cooperative fibers, a foreign call bridge and
// deferred render queues for the hybrid update/draw model

use std::mem;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};
use tracing::{debug, info, warn};

use super::entity::EntityHooks;
use super::fiber::{Fiber, FiberExit, Scheduler};
use super::files::FileTable;
use super::foreign::{ForeignFn, ForeignRegistry, ForeignResult};
use super::ops::{self, ArithOp, CompareOp};
use super::render::{RenderCategory, RenderItem, RenderQueues};
use super::runtime::GameRuntime;
use super::value::{ArrayRef, MapRef, Value};
use crate::builtins;
use crate::bytecode::{Chunk, OpCode};
use crate::config::VmConfig;
use crate::error::{CyberError, CyberResult, ErrorKind, StackFrame};

pub const STACK_MAX: usize = 65536;
const FRAMES_MAX: usize = 4096;
const MAX_ARRAY_DIMS: usize = 8;
const MAX_ARRAY_ELEMENTS: usize = 1 << 24;

/// Return address marking the bottom frame of a host-invoked routine
const RETURN_SENTINEL: usize = usize::MAX;

/// `On <event> <key>` handler registered by bytecode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHandler {
    pub event: String,
    pub key: String,
    pub handler: usize,
}

/// The CyberBasic Virtual Machine. Each instance owns its globals and
/// registries; nothing is shared between instances.
pub struct VM {
    chunk: Option<Arc<Chunk>>,
    /// Working state of the running fiber
    pub(super) fiber: Fiber,
    scheduler: Scheduler,
    globals: FxHashMap<String, Value>,
    foreign: ForeignRegistry,
    entities: EntityHooks,
    render: RenderQueues,
    pub(super) runtime: Option<Box<dyn GameRuntime>>,
    pub(super) files: FileTable,
    events: Vec<EventHandler>,
    collision_handlers: FxHashMap<String, String>,
    pub(super) timer_zero: Instant,
    running: bool,
    quit_requested: bool,
    /// Depth of host-invoked routines (`invoke_sub`, event handlers)
    nested: usize,
    /// Offset of the instruction being executed
    op_start: usize,
    max_stack: usize,
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

impl VM {
    pub fn new() -> Self {
        Self {
            chunk: None,
            fiber: Fiber::default(),
            scheduler: Scheduler::new(),
            globals: FxHashMap::default(),
            foreign: ForeignRegistry::new(),
            entities: EntityHooks::default(),
            render: RenderQueues::default(),
            runtime: None,
            files: FileTable::default(),
            events: Vec::new(),
            collision_handlers: FxHashMap::default(),
            timer_zero: Instant::now(),
            running: false,
            quit_requested: false,
            nested: 0,
            op_start: 0,
            max_stack: STACK_MAX,
        }
    }

    /// Load a chunk and reset all execution state to a single main fiber at
    /// offset 0. Registries, hooks and render classifications are kept.
    pub fn load_chunk(&mut self, chunk: impl Into<Arc<Chunk>>) {
        let chunk = chunk.into();

        self.fiber = Fiber::default();
        self.scheduler = Scheduler::new();
        self.globals.clear();
        self.events.clear();
        self.collision_handlers.clear();
        self.files.close_all();
        self.render.clear();
        self.timer_zero = Instant::now();
        self.running = false;
        self.quit_requested = false;
        self.nested = 0;
        self.op_start = 0;

        // shapes of arrays declared at top level
        self.fiber.array_dims = chunk
            .var_dims
            .iter()
            .filter_map(|(name, dims)| chunk.variables.get(name).map(|slot| (*slot, dims.clone())))
            .collect();

        builtins::enums::install(&mut self.foreign, chunk.clone());

        info!(
            bytes = chunk.code.len(),
            constants = chunk.constants.len(),
            functions = chunk.functions.len(),
            "chunk loaded"
        );
        self.chunk = Some(chunk);
    }

    pub fn chunk(&self) -> Option<&Chunk> {
        self.chunk.as_deref()
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.chunk
            .as_ref()
            .is_some_and(|c| c.functions.contains_key(&name.to_lowercase()))
    }

    pub fn apply_config(&mut self, config: &VmConfig) {
        self.max_stack = config.max_stack.max(1);
        for (category, names) in config.render.entries() {
            for name in names {
                self.render.classify(name, category);
            }
        }
    }

    pub fn set_max_stack(&mut self, max: usize) {
        self.max_stack = max.max(1);
    }

    // ==================== Host API ====================

    pub fn set_runtime(&mut self, runtime: Box<dyn GameRuntime>) {
        self.runtime = Some(runtime);
    }

    pub fn runtime_mut(&mut self) -> Option<&mut (dyn GameRuntime + 'static)> {
        self.runtime.as_deref_mut()
    }

    pub fn register_foreign<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> ForeignResult + Send + Sync + 'static,
    {
        self.foreign.register(name, func);
    }

    pub fn register_foreign_fn(&mut self, name: &str, func: ForeignFn) {
        self.foreign.register_fn(name, func);
    }

    /// Replace the whole foreign registry
    pub fn set_foreign_registry(&mut self, registry: ForeignRegistry) {
        self.foreign = registry;
        if let Some(chunk) = self.chunk.clone() {
            builtins::enums::install(&mut self.foreign, chunk);
        }
    }

    pub fn foreign(&self) -> &ForeignRegistry {
        &self.foreign
    }

    pub fn foreign_mut(&mut self) -> &mut ForeignRegistry {
        &mut self.foreign
    }

    /// Invoke a foreign function directly, bypassing render deferral
    pub fn call_foreign(&mut self, name: &str, args: &[Value]) -> CyberResult<Value> {
        let func = self.foreign.get(name).ok_or_else(|| {
            CyberError::new(
                ErrorKind::UnknownForeign,
                format!("unknown foreign function: {}", name),
            )
        })?;
        func(args).map_err(|e| e.into_cyber_error(name))
    }

    pub fn register_entity_getter<F>(&mut self, key: &str, getter: F)
    where
        F: Fn(&str, &str) -> Option<Value> + Send + Sync + 'static,
    {
        self.entities.register_getter(key, getter);
    }

    pub fn register_entity_setter<F>(&mut self, key: &str, setter: F)
    where
        F: Fn(&str, &str, Value) -> bool + Send + Sync + 'static,
    {
        self.entities.register_setter(key, setter);
    }

    pub fn register_render_type(&mut self, name: &str, category: RenderCategory) {
        self.render.classify(name, category);
    }

    pub fn push_render_command(&mut self, name: &str, args: Vec<Value>, category: RenderCategory) {
        self.render.push(category, name, args);
    }

    pub fn clear_render_queues(&mut self) {
        self.render.clear();
    }

    pub fn render_queue(&self, category: RenderCategory) -> &[RenderItem] {
        self.render.queue(category)
    }

    /// Run every deferred call of one category in emission order
    pub fn flush_render_category(&mut self, category: RenderCategory) -> CyberResult<usize> {
        let items = self.render.take(category);
        for item in &items {
            self.call_foreign(&item.name, &item.args)?;
        }
        Ok(items.len())
    }

    /// Flush all queues in `RenderCategory::FLUSH_ORDER`
    pub fn flush_render_queues(&mut self) -> CyberResult<usize> {
        let mut flushed = 0;
        for category in RenderCategory::FLUSH_ORDER {
            flushed += self.flush_render_category(category)?;
        }
        Ok(flushed)
    }

    pub fn register_collision_handler(&mut self, body: &str, sub: &str) {
        self.collision_handlers
            .insert(body.to_lowercase(), sub.to_lowercase());
    }

    pub fn collision_handlers(&self) -> &FxHashMap<String, String> {
        &self.collision_handlers
    }

    /// Run the collision handler registered for `body`, if any
    pub fn fire_collision(&mut self, body: &str, args: &[Value]) -> CyberResult<bool> {
        let Some(sub) = self.collision_handlers.get(&body.to_lowercase()).cloned() else {
            return Ok(false);
        };
        self.invoke_sub(&sub, args)?;
        Ok(true)
    }

    pub fn event_handlers(&self) -> &[EventHandler] {
        &self.events
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(&name.to_lowercase()).cloned()
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_lowercase(), value);
    }

    /// Operand stack of the running fiber
    pub fn stack(&self) -> &[Value] {
        &self.fiber.stack
    }

    pub fn ip(&self) -> usize {
        self.fiber.ip
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    /// True once every fiber has finished
    pub fn is_finished(&self) -> bool {
        self.scheduler.live_fibers() == 0
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Current instruction followed by the pending return addresses, newest first
    pub fn stack_trace(&self) -> Vec<StackFrame> {
        let line = |ip: usize| self.chunk.as_ref().and_then(|c| c.get_line(ip));
        let mut frames = vec![StackFrame::new(self.op_start, line(self.op_start))];
        for ret in self.fiber.call_stack.iter().rev() {
            if *ret == RETURN_SENTINEL {
                continue;
            }
            // the byte before a return address belongs to the call instruction
            frames.push(StackFrame::new(*ret, line(ret.saturating_sub(1))));
        }
        frames
    }

    // ==================== Execution ====================

    fn loaded_chunk(&self) -> CyberResult<Arc<Chunk>> {
        self.chunk
            .clone()
            .ok_or_else(|| CyberError::runtime_error("no chunk loaded"))
    }

    /// Run fibers until every one has finished or `Halt`/`Quit` executes.
    /// Blocks (without spinning) while all remaining fibers are asleep.
    pub fn run(&mut self) -> CyberResult<()> {
        let chunk = self.loaded_chunk()?;
        self.running = true;

        while self.running {
            if self.scheduler.sleeping() > 0 {
                self.scheduler.wake_expired(Instant::now(), &mut self.fiber);
            }
            if self.scheduler.current().is_none() {
                if self.scheduler.resume_idle(&mut self.fiber) {
                    continue;
                }
                match self.scheduler.next_wake() {
                    Some(wake_at) => {
                        let now = Instant::now();
                        if wake_at > now {
                            debug!(wait_ms = (wake_at - now).as_millis() as u64, "all fibers asleep");
                            thread::sleep(wake_at - now);
                        }
                        continue;
                    }
                    None => break,
                }
            }
            if let Err(e) = self.execute(&chunk) {
                self.running = false;
                return Err(e.with_stack_trace(self.stack_trace()));
            }
        }

        self.running = false;
        Ok(())
    }

    /// Execute a single instruction of the running fiber
    pub fn step(&mut self) -> CyberResult<()> {
        let chunk = self.loaded_chunk()?;
        if self.scheduler.current().is_none() {
            self.scheduler.wake_expired(Instant::now(), &mut self.fiber);
            if !self.scheduler.resume_idle(&mut self.fiber) {
                return Ok(());
            }
        }
        self.execute(&chunk)
            .map_err(|e| e.with_stack_trace(self.stack_trace()))
    }

    /// Call a Sub/Function by name and run it to completion. Arguments land
    /// in slots 0..n. Returns the routine's value for `Return <expr>`.
    pub fn invoke_sub(&mut self, name: &str, args: &[Value]) -> CyberResult<Option<Value>> {
        let chunk = self.loaded_chunk()?;
        let key = name.to_lowercase();
        let offset = *chunk.functions.get(&key).ok_or_else(|| {
            CyberError::new(
                ErrorKind::UndefinedFunction,
                format!("undefined function: {}", name),
            )
        })?;
        self.invoke_at(&chunk, offset, args.to_vec(), key == "draw")
    }

    /// Run a routine at `offset` on a scratch fiber, then restore the
    /// interrupted state. Inside it `Yield` is a no-op and `WaitSeconds`
    /// is an error.
    fn invoke_at(
        &mut self,
        chunk: &Chunk,
        offset: usize,
        args: Vec<Value>,
        is_draw: bool,
    ) -> CyberResult<Option<Value>> {
        let mut scratch = Fiber {
            ip: offset,
            stack: args,
            ..Fiber::default()
        };
        scratch.push_frame(RETURN_SENTINEL, is_draw);
        let saved = mem::replace(&mut self.fiber, scratch);
        let saved_op = self.op_start;
        let was_running = self.running;
        self.running = true;
        self.nested += 1;

        let mut outcome = Ok(());
        while self.running
            && !self.fiber.call_stack.is_empty()
            && self.fiber.ip < chunk.code.len()
        {
            if let Err(e) = self.execute(chunk) {
                outcome = Err(e.with_stack_trace(self.stack_trace()));
                break;
            }
        }

        let result = if outcome.is_ok() && self.fiber.call_stack.is_empty() {
            self.fiber.stack.pop()
        } else {
            None
        };

        self.nested -= 1;
        self.fiber = saved;
        self.op_start = saved_op;
        self.running = was_running && !self.quit_requested;
        outcome.map(|_| result)
    }

    /// Run the handler of every registered key event the runtime reports
    /// as active. Handlers run synchronously.
    pub fn process_events(&mut self) -> CyberResult<()> {
        let Some(runtime) = self.runtime.as_deref() else {
            return Ok(());
        };
        let triggered: Vec<usize> = self
            .events
            .iter()
            .filter(|h| match h.event.as_str() {
                "keydown" => runtime.is_key_down(&h.key),
                "keypressed" => runtime.is_key_pressed(&h.key),
                _ => false,
            })
            .map(|h| h.handler)
            .collect();
        if triggered.is_empty() {
            return Ok(());
        }

        let chunk = self.loaded_chunk()?;
        for handler in triggered {
            self.invoke_at(&chunk, handler, Vec::new(), false)?;
        }
        Ok(())
    }

    fn execute(&mut self, chunk: &Chunk) -> CyberResult<()> {
        let start = self.fiber.ip;
        let Some(&byte) = chunk.code.get(start) else {
            // running off the end finishes the fiber
            self.finish_fiber();
            return Ok(());
        };
        self.op_start = start;
        self.fiber.ip += 1;
        self.dispatch(chunk, byte)
            .map_err(|e| e.at(start, chunk.get_line(start)))
    }

    fn finish_fiber(&mut self) {
        if self.nested > 0 {
            return;
        }
        match self.scheduler.finish(&mut self.fiber) {
            FiberExit::Resumed(_) | FiberExit::Idle => {}
            FiberExit::Done => {
                debug!("all fibers finished");
                self.running = false;
            }
        }
    }

    fn dispatch(&mut self, chunk: &Chunk, byte: u8) -> CyberResult<()> {
        let op = OpCode::from_byte(byte)
            .ok_or_else(|| CyberError::invalid_bytecode(format!("unknown opcode: {}", byte)))?;

        match op {
            // Stack
            OpCode::Push => {
                let imm = self.read_byte(chunk)?;
                self.push(Value::Int(imm as i64))?;
            }
            OpCode::Pop => {
                self.pop("Pop")?;
            }
            OpCode::Dup => {
                let top = self.peek(0, "Dup")?.clone();
                self.push(top)?;
            }
            OpCode::Swap => {
                self.require(2, "Swap")?;
                let len = self.fiber.stack.len();
                self.fiber.stack.swap(len - 1, len - 2);
            }

            // Variables
            OpCode::LoadVar => {
                let slot = self.read_byte(chunk)? as usize;
                self.ensure_slot(slot)?;
                let value = self.fiber.stack[slot].clone();
                self.push(value)?;
            }
            OpCode::StoreVar => {
                let slot = self.read_byte(chunk)? as usize;
                let value = self.pop("StoreVar")?;
                self.ensure_slot(slot)?;
                self.fiber.stack[slot] = value;
            }
            OpCode::LoadGlobal => {
                let name = self.read_name(chunk)?;
                self.load_global(name)?;
            }
            OpCode::StoreGlobal => {
                let name = self.read_name(chunk)?;
                let value = self.pop("StoreGlobal")?;
                self.globals.insert(name.to_lowercase(), value);
            }
            OpCode::LoadEntityProp => {
                let entity = self.read_name(chunk)?;
                let prop = self.read_name(chunk)?;
                let value = self.load_entity_prop(entity, prop)?;
                self.push(value)?;
            }
            OpCode::StoreEntityProp => {
                let entity = self.read_name(chunk)?;
                let prop = self.read_name(chunk)?;
                self.store_entity_prop(entity, prop)?;
            }

            // Literals
            OpCode::LoadConst | OpCode::LoadString => {
                let value = self.read_constant(chunk)?.clone();
                self.push(value)?;
            }

            // Arithmetic
            OpCode::Add => self.arith(ArithOp::Add)?,
            OpCode::Sub => self.arith(ArithOp::Sub)?,
            OpCode::Mul => self.arith(ArithOp::Mul)?,
            OpCode::Div => self.arith(ArithOp::Div)?,
            OpCode::Mod => self.arith(ArithOp::Mod)?,
            OpCode::Power => self.arith(ArithOp::Power)?,
            OpCode::IntDiv => self.arith(ArithOp::IntDiv)?,
            OpCode::Neg => {
                let value = ops::negate(self.peek(0, "Neg")?)?;
                self.replace_top(1, value);
            }

            // Comparison
            OpCode::Equal => self.binary("=", |a, b| Ok(Value::Bool(ops::values_equal(a, b))))?,
            OpCode::NotEqual => {
                self.binary("<>", |a, b| Ok(Value::Bool(!ops::values_equal(a, b))))?
            }
            OpCode::Less => self.compare(CompareOp::Less)?,
            OpCode::LessEqual => self.compare(CompareOp::LessEqual)?,
            OpCode::Greater => self.compare(CompareOp::Greater)?,
            OpCode::GreaterEqual => self.compare(CompareOp::GreaterEqual)?,

            // Logical
            OpCode::And => self.binary("And", |a, b| Ok(Value::Bool(a.is_truthy() && b.is_truthy())))?,
            OpCode::Or => self.binary("Or", |a, b| Ok(Value::Bool(a.is_truthy() || b.is_truthy())))?,
            OpCode::Xor => self.binary("Xor", |a, b| Ok(Value::Bool(a.is_truthy() != b.is_truthy())))?,
            OpCode::Not => {
                let value = Value::Bool(!self.peek(0, "Not")?.is_truthy());
                self.replace_top(1, value);
            }

            // Control flow
            OpCode::Jump => {
                let rel = self.read_i16(chunk)?;
                self.jump(chunk, rel)?;
            }
            OpCode::JumpIfFalse => {
                let rel = self.read_i16(chunk)?;
                let cond = self.peek(0, "JumpIfFalse")?.is_truthy();
                if !cond {
                    self.jump(chunk, rel)?;
                }
                self.fiber.stack.pop();
            }
            OpCode::JumpIfTrue => {
                let rel = self.read_i16(chunk)?;
                let cond = self.peek(0, "JumpIfTrue")?.is_truthy();
                if cond {
                    self.jump(chunk, rel)?;
                }
                self.fiber.stack.pop();
            }

            // Subroutines
            OpCode::CallUser => {
                let name = self.read_name(chunk)?;
                let argc = self.read_byte(chunk)? as usize;
                self.call_user(chunk, name, argc)?;
            }
            OpCode::Return => match self.fiber.pop_frame() {
                Some(ret) => {
                    self.fiber.stack.clear();
                    self.fiber.ip = ret;
                }
                None => self.finish_fiber(),
            },
            OpCode::ReturnVal => {
                let value = self.pop("ReturnVal")?;
                match self.fiber.pop_frame() {
                    Some(ret) => {
                        self.fiber.stack.clear();
                        self.fiber.ip = ret;
                        self.fiber.stack.push(value);
                    }
                    // a finished fiber's value has nowhere to go
                    None => self.finish_fiber(),
                }
            }

            // Host bridge
            OpCode::CallForeign => {
                let name = self.read_name(chunk)?;
                let argc = self.read_byte(chunk)? as usize;
                self.call_foreign_op(name, argc)?;
            }
            OpCode::RegisterEvent => {
                let event = self.read_name(chunk)?.to_lowercase();
                let key = self.read_name(chunk)?.to_string();
                let handler = self.read_u16(chunk)? as usize;
                if handler > chunk.code.len() {
                    return Err(CyberError::invalid_bytecode(format!(
                        "event handler offset {} is outside the code",
                        handler
                    )));
                }
                if event != "keydown" && event != "keypressed" {
                    warn!(event = %event, "unknown event type; handler will never fire");
                }
                self.events.push(EventHandler { event, key, handler });
            }

            // Fibers
            OpCode::StartCoroutine => {
                let target = self.read_u16(chunk)? as usize;
                if target > chunk.code.len() {
                    return Err(CyberError::invalid_bytecode(format!(
                        "coroutine target {} is outside the code",
                        target
                    )));
                }
                self.scheduler.spawn(target);
            }
            OpCode::Yield => {
                if self.nested == 0 {
                    self.scheduler.yield_now(&mut self.fiber);
                }
            }
            OpCode::WaitSeconds => {
                let seconds = self.peek(0, "WaitSeconds")?.to_f64();
                if seconds > 0.0 && self.nested > 0 {
                    return Err(CyberError::runtime_error(
                        "WaitSeconds cannot suspend a routine invoked by the host",
                    ));
                }
                self.fiber.stack.pop();
                if seconds > 0.0 {
                    let wake_at = Instant::now() + Duration::from_secs_f64(seconds);
                    self.scheduler.sleep(&mut self.fiber, wake_at);
                }
            }

            // Arrays
            OpCode::CreateArray => self.create_array(chunk)?,
            OpCode::LoadArray => {
                let slot = self.read_byte(chunk)? as usize;
                self.load_array(slot)?;
            }
            OpCode::StoreArray => {
                let slot = self.read_byte(chunk)? as usize;
                self.store_array(slot)?;
            }

            OpCode::Quit => {
                info!("quit requested");
                self.quit_requested = true;
                self.running = false;
            }
            OpCode::Halt => {
                self.running = false;
            }

            OpCode::MatMul => {
                let r = self.read_name(chunk)?;
                let a = self.read_name(chunk)?;
                let b = self.read_name(chunk)?;
                self.mat_mul(chunk, r, a, b)?;
            }

            other => self.intrinsic(other)?,
        }

        Ok(())
    }

    // ==================== Calls ====================

    fn call_user(&mut self, chunk: &Chunk, name: &str, argc: usize) -> CyberResult<()> {
        let target = *chunk.functions.get(&name.to_lowercase()).ok_or_else(|| {
            CyberError::new(
                ErrorKind::UndefinedFunction,
                format!("undefined function: {}", name),
            )
        })?;
        self.require(argc, name)?;
        if self.fiber.call_stack.len() >= FRAMES_MAX {
            return Err(CyberError::new(ErrorKind::StackOverflow, "call stack overflow"));
        }

        // the callee's frame is exactly its arguments
        let args = self.fiber.stack.split_off(self.fiber.stack.len() - argc);
        self.fiber.stack = args;
        let ret = self.fiber.ip;
        self.fiber.push_frame(ret, name.eq_ignore_ascii_case("draw"));
        self.fiber.ip = target;
        Ok(())
    }

    fn call_foreign_op(&mut self, name: &str, argc: usize) -> CyberResult<()> {
        self.require(argc, name)?;
        let start = self.fiber.stack.len() - argc;
        let key = name.to_lowercase();

        if self.fiber.inside_draw() {
            if let Some(category) = self.render.category_of(&key) {
                let args = self.fiber.stack.split_off(start);
                debug!(function = name, %category, "render call deferred");
                self.render.push(category, name, args);
                return Ok(());
            }
        }

        let func = self.foreign.get(&key).ok_or_else(|| {
            CyberError::new(
                ErrorKind::UnknownForeign,
                format!("unknown foreign function: {}", name),
            )
        })?;
        let result = func(&self.fiber.stack[start..]).map_err(|e| e.into_cyber_error(name))?;
        self.fiber.stack.truncate(start);
        if !result.is_nil() {
            self.push(result)?;
        }
        Ok(())
    }

    fn load_global(&mut self, name: &str) -> CyberResult<()> {
        let key = name.to_lowercase();
        if let Some(value) = self.globals.get(&key) {
            let value = value.clone();
            return self.push(value);
        }
        // zero-argument foreign functions double as constants (e.g. KEY_W)
        if let Some(func) = self.foreign.get(&key) {
            let value = func(&[]).map_err(|e| e.into_cyber_error(name))?;
            return self.push(value);
        }
        Err(CyberError::new(
            ErrorKind::UndefinedVariable,
            format!("undefined global variable: {}", name),
        ))
    }

    // ==================== Entities ====================

    fn entity_map(&self, entity: &str, key: &str) -> CyberResult<MapRef> {
        match self.globals.get(key) {
            Some(Value::Map(map)) => Ok(map.clone()),
            Some(other) => Err(CyberError::type_error(format!(
                "entity {} is not a map ({})",
                entity,
                other.type_name()
            ))),
            None => Err(CyberError::new(
                ErrorKind::UndefinedVariable,
                format!("entity not found: {}", entity),
            )),
        }
    }

    fn load_entity_prop(&self, entity: &str, prop: &str) -> CyberResult<Value> {
        let entity_key = entity.to_lowercase();
        let prop_key = prop.to_lowercase();
        if let Some(value) = self.entities.get(&entity_key, &prop_key) {
            return Ok(value);
        }

        let map = self.entity_map(entity, &entity_key)?;
        let map = map.lock();
        if let Some(value) = map.get(prop) {
            return Ok(value.clone());
        }
        Ok(map
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(prop))
            .map(|(_, v)| v.clone())
            .unwrap_or_default())
    }

    fn store_entity_prop(&mut self, entity: &str, prop: &str) -> CyberResult<()> {
        let entity_key = entity.to_lowercase();
        let prop_key = prop.to_lowercase();
        let value = self.peek(0, "StoreEntityProp")?.clone();

        if !self.entities.set(&entity_key, &prop_key, &value) {
            let map = self.entity_map(entity, &entity_key)?;
            let mut map = map.lock();
            let existing = map
                .keys()
                .find(|k| k.eq_ignore_ascii_case(prop))
                .cloned();
            map.insert(existing.unwrap_or_else(|| prop.to_string()), value);
        }
        self.fiber.stack.pop();
        Ok(())
    }

    // ==================== Arrays ====================

    fn create_array(&mut self, chunk: &Chunk) -> CyberResult<()> {
        let ndims = self.read_byte(chunk)? as usize;
        if ndims == 0 || ndims > MAX_ARRAY_DIMS {
            return Err(CyberError::new(
                ErrorKind::DimensionMismatch,
                format!("invalid array dimension count: {}", ndims),
            ));
        }
        let mut dims = Vec::with_capacity(ndims);
        for _ in 0..ndims {
            let extent = self.read_constant(chunk)?.to_i64();
            let extent = usize::try_from(extent).map_err(|_| {
                CyberError::new(
                    ErrorKind::DimensionMismatch,
                    format!("negative array dimension: {}", extent),
                )
            })?;
            dims.push(extent);
        }
        let slot = self.read_byte(chunk)? as usize;

        let size = dims
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(*d))
            .filter(|n| *n <= MAX_ARRAY_ELEMENTS)
            .ok_or_else(|| CyberError::runtime_error(format!("array too large: {:?}", dims)))?;

        self.ensure_slot(slot)?;
        self.fiber.stack[slot] = Value::array(vec![Value::Int(0); size]);
        self.fiber.array_dims.insert(slot, dims);
        Ok(())
    }

    /// Resolve the flattened index for the indices on top of the stack
    /// without popping them. Arrays the frame did not `DIM` itself (passed
    /// in or returned by a foreign call) index as one dimension.
    fn array_target(&self, slot: usize, what: &str) -> CyberResult<(ArrayRef, usize, usize)> {
        let array = match self.fiber.stack.get(slot) {
            Some(Value::Array(arr)) => arr.clone(),
            Some(other) => {
                return Err(CyberError::type_error(format!(
                    "{}: variable at slot {} is not an array ({})",
                    what,
                    slot,
                    other.type_name()
                )))
            }
            None => {
                return Err(CyberError::runtime_error(format!(
                    "{}: array at slot {} is not initialized",
                    what, slot
                )))
            }
        };

        let actual = array.lock().len();
        let dims: SmallVec<[usize; MAX_ARRAY_DIMS]> = match self.fiber.array_dims.get(&slot) {
            Some(dims) => {
                let expected: usize = dims.iter().product();
                if actual != expected {
                    return Err(CyberError::new(
                        ErrorKind::DimensionMismatch,
                        format!(
                            "{}: array holds {} elements but dimensions {:?} need {}",
                            what, actual, dims, expected
                        ),
                    ));
                }
                dims.iter().copied().collect()
            }
            None => smallvec![actual],
        };

        let n = dims.len();
        self.require(n, what)?;
        let base = self.fiber.stack.len() - n;
        let mut indices: SmallVec<[i64; MAX_ARRAY_DIMS]> = SmallVec::new();
        for value in &self.fiber.stack[base..] {
            let index = match value {
                Value::Int(i) => *i,
                Value::Float(f) => f.trunc() as i64,
                other => {
                    return Err(CyberError::type_error(format!(
                        "{}: array index must be a number, got {}",
                        what,
                        other.type_name()
                    )))
                }
            };
            indices.push(index);
        }

        let mut flat = 0usize;
        let mut stride = 1usize;
        for d in (0..n).rev() {
            let i = indices[d];
            if i < 0 || i as usize >= dims[d] {
                return Err(CyberError::index_out_of_bounds(format!(
                    "array index {:?} out of bounds for dimensions {:?}",
                    indices.as_slice(),
                    dims
                )));
            }
            flat += i as usize * stride;
            stride *= dims[d];
        }
        Ok((array, flat, n))
    }

    fn load_array(&mut self, slot: usize) -> CyberResult<()> {
        let (array, flat, n) = self.array_target(slot, "LoadArray")?;
        let value = array.lock()[flat].clone();
        let len = self.fiber.stack.len();
        self.fiber.stack.truncate(len - n);
        self.push(value)
    }

    fn store_array(&mut self, slot: usize) -> CyberResult<()> {
        let (array, flat, n) = self.array_target(slot, "StoreArray")?;
        let len = self.fiber.stack.len();
        if len < n + 1 {
            return Err(CyberError::stack_underflow("StoreArray value"));
        }
        let value = self.fiber.stack[len - n - 1].clone();
        array.lock()[flat] = value;
        self.fiber.stack.truncate(len - n - 1);
        Ok(())
    }

    // ==================== Helpers ====================

    pub(super) fn push(&mut self, value: Value) -> CyberResult<()> {
        if self.fiber.stack.len() >= self.max_stack {
            return Err(CyberError::new(ErrorKind::StackOverflow, "Stack overflow"));
        }
        self.fiber.stack.push(value);
        Ok(())
    }

    pub(super) fn pop(&mut self, what: &str) -> CyberResult<Value> {
        self.fiber
            .stack
            .pop()
            .ok_or_else(|| CyberError::stack_underflow(what))
    }

    pub(super) fn peek(&self, distance: usize, what: &str) -> CyberResult<&Value> {
        let idx = self
            .fiber
            .stack
            .len()
            .checked_sub(1 + distance)
            .ok_or_else(|| CyberError::stack_underflow(what))?;
        Ok(&self.fiber.stack[idx])
    }

    pub(super) fn require(&self, n: usize, what: &str) -> CyberResult<()> {
        if self.fiber.stack.len() < n {
            Err(CyberError::stack_underflow(what))
        } else {
            Ok(())
        }
    }

    /// Drop the top `n` values and push `value` (caller checked the depth)
    pub(super) fn replace_top(&mut self, n: usize, value: Value) {
        let len = self.fiber.stack.len();
        self.fiber.stack.truncate(len - n);
        self.fiber.stack.push(value);
    }

    /// Grow the stack with nil until `slot` exists
    pub(super) fn ensure_slot(&mut self, slot: usize) -> CyberResult<()> {
        if slot >= self.max_stack {
            return Err(CyberError::new(ErrorKind::StackOverflow, "Stack overflow"));
        }
        if self.fiber.stack.len() <= slot {
            self.fiber.stack.resize(slot + 1, Value::Nil);
        }
        Ok(())
    }

    fn binary(
        &mut self,
        what: &str,
        op: impl FnOnce(&Value, &Value) -> CyberResult<Value>,
    ) -> CyberResult<()> {
        self.require(2, what)?;
        let len = self.fiber.stack.len();
        let result = op(&self.fiber.stack[len - 2], &self.fiber.stack[len - 1])?;
        self.replace_top(2, result);
        Ok(())
    }

    fn arith(&mut self, op: ArithOp) -> CyberResult<()> {
        self.binary(op.symbol(), |a, b| ops::arithmetic(op, a, b))
    }

    fn compare(&mut self, op: CompareOp) -> CyberResult<()> {
        self.binary("comparison", |a, b| ops::compare(op, a, b).map(Value::Bool))
    }

    fn jump(&mut self, chunk: &Chunk, rel: i16) -> CyberResult<()> {
        let target = self.fiber.ip as i64 + rel as i64;
        if target < 0 || target as usize > chunk.code.len() {
            return Err(CyberError::invalid_bytecode(format!(
                "jump target {} is outside the code",
                target
            )));
        }
        self.fiber.ip = target as usize;
        Ok(())
    }

    pub(super) fn read_byte(&mut self, chunk: &Chunk) -> CyberResult<u8> {
        let byte = chunk
            .read_u8(self.fiber.ip)
            .ok_or_else(|| CyberError::invalid_bytecode("unexpected end of code"))?;
        self.fiber.ip += 1;
        Ok(byte)
    }

    fn read_u16(&mut self, chunk: &Chunk) -> CyberResult<u16> {
        let value = chunk
            .read_u16(self.fiber.ip)
            .ok_or_else(|| CyberError::invalid_bytecode("unexpected end of code"))?;
        self.fiber.ip += 2;
        Ok(value)
    }

    fn read_i16(&mut self, chunk: &Chunk) -> CyberResult<i16> {
        Ok(self.read_u16(chunk)? as i16)
    }

    pub(super) fn read_constant<'c>(&mut self, chunk: &'c Chunk) -> CyberResult<&'c Value> {
        let idx = self.read_byte(chunk)? as usize;
        chunk.constants.get(idx).ok_or_else(|| {
            CyberError::invalid_bytecode(format!("constant index {} out of bounds", idx))
        })
    }

    pub(super) fn read_name<'c>(&mut self, chunk: &'c Chunk) -> CyberResult<&'c str> {
        match self.read_constant(chunk)? {
            Value::String(s) => Ok(&s[..]),
            other => Err(CyberError::type_error(format!(
                "name constant must be a string, got {}",
                other.type_name()
            ))),
        }
    }
}
