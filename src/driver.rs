// Hybrid update/draw frame driver
//
// One frame: frame time -> physics -> key events -> update(dt) -> clear
// render queues -> draw() -> flush 2D, 3D, GUI -> present.

use crate::error::CyberResult;
use crate::vm::{RenderCategory, Value, VM};
use tracing::trace;

/// Window/physics side of the frame loop
pub trait FrameHost {
    /// Seconds since the previous frame
    fn frame_time(&mut self) -> f64;

    fn step_physics(&mut self, _dt: f64) -> CyberResult<()> {
        Ok(())
    }

    /// Called before a non-empty render queue is flushed
    fn begin_layer(&mut self, _category: RenderCategory) {}

    fn end_layer(&mut self, _category: RenderCategory) {}

    fn present(&mut self) {}

    fn should_close(&self) -> bool {
        false
    }
}

/// Host without a window: fixed frame time, records what it was asked to do
#[derive(Debug, Clone)]
pub struct HeadlessHost {
    pub frame_time: f64,
    pub frames: u64,
    pub physics_time: f64,
    pub layers: Vec<RenderCategory>,
    pub close_after: Option<u64>,
}

impl HeadlessHost {
    pub fn new(frame_time: f64) -> Self {
        Self {
            frame_time,
            frames: 0,
            physics_time: 0.0,
            layers: Vec::new(),
            close_after: None,
        }
    }
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new(1.0 / 60.0)
    }
}

impl FrameHost for HeadlessHost {
    fn frame_time(&mut self) -> f64 {
        self.frame_time
    }

    fn step_physics(&mut self, dt: f64) -> CyberResult<()> {
        self.physics_time += dt;
        Ok(())
    }

    fn begin_layer(&mut self, category: RenderCategory) {
        self.layers.push(category);
    }

    fn present(&mut self) {
        self.frames += 1;
    }

    fn should_close(&self) -> bool {
        self.close_after.is_some_and(|n| self.frames >= n)
    }
}

/// What one frame did
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameStats {
    pub dt: f64,
    pub updated: bool,
    pub drawn: bool,
    pub flushed: usize,
}

pub fn step_frame(vm: &mut VM, host: &mut dyn FrameHost) -> CyberResult<FrameStats> {
    let mut stats = FrameStats {
        dt: host.frame_time(),
        ..FrameStats::default()
    };
    trace!(dt = stats.dt, "frame begin");

    host.step_physics(stats.dt)?;
    vm.process_events()?;

    if vm.has_function("update") {
        vm.invoke_sub("update", &[Value::Float(stats.dt)])?;
        stats.updated = true;
    }

    vm.clear_render_queues();
    if vm.has_function("draw") {
        vm.invoke_sub("draw", &[])?;
        stats.drawn = true;
    }

    for category in RenderCategory::FLUSH_ORDER {
        if vm.render_queue(category).is_empty() {
            continue;
        }
        host.begin_layer(category);
        let flushed = vm.flush_render_category(category);
        host.end_layer(category);
        stats.flushed += flushed?;
    }

    host.present();
    trace!(flushed = stats.flushed, "frame end");
    Ok(stats)
}

/// Run up to `frames` frames, stopping early when the host closes or the
/// program quits. Returns the number of frames run.
pub fn run_frames(vm: &mut VM, host: &mut dyn FrameHost, frames: u64) -> CyberResult<u64> {
    let mut ran = 0;
    while ran < frames && !host.should_close() && !vm.quit_requested() {
        step_frame(vm, host)?;
        ran += 1;
    }
    Ok(ran)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Chunk, OpCode};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn game() -> Chunk {
        let mut c = Chunk::new();
        c.write_op(OpCode::Halt);

        // Sub update(dt): ticks = ticks + 1
        c.define_function("update");
        let ticks = c.name_constant("ticks").unwrap();
        c.emit(OpCode::LoadGlobal, &[ticks]);
        c.emit(OpCode::Push, &[1]);
        c.write_op(OpCode::Add);
        c.emit(OpCode::StoreGlobal, &[ticks]);
        c.write_op(OpCode::Return);

        // Sub draw(): DrawText(ticks) ; DrawCube()
        c.define_function("draw");
        c.emit(OpCode::LoadGlobal, &[ticks]);
        let text = c.name_constant("DrawText").unwrap();
        c.emit(OpCode::CallForeign, &[text, 1]);
        let cube = c.name_constant("DrawCube").unwrap();
        c.emit(OpCode::CallForeign, &[cube, 0]);
        c.write_op(OpCode::Return);
        c
    }

    fn game_vm(log: &Arc<Mutex<Vec<String>>>) -> VM {
        let mut vm = VM::new();
        crate::builtins::install(&mut vm);
        for name in ["DrawText", "DrawCube"] {
            let log = log.clone();
            vm.register_foreign(name, move |args: &[Value]| {
                let args: Vec<String> = args.iter().map(|v| v.to_string()).collect();
                log.lock().push(format!("{}({})", name, args.join(",")));
                Ok(Value::Nil)
            });
        }
        vm.load_chunk(game());
        vm.set_global("ticks", Value::Int(0));
        vm.run().unwrap();
        vm
    }

    #[test]
    fn test_frame_runs_update_then_deferred_draw() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut vm = game_vm(&log);
        let mut host = HeadlessHost::default();

        let stats = step_frame(&mut vm, &mut host).unwrap();
        assert!(stats.updated && stats.drawn);
        assert_eq!(stats.flushed, 2);
        assert_eq!(*log.lock(), vec!["DrawText(1)", "DrawCube()"]);
        assert_eq!(host.layers, vec![RenderCategory::TwoD, RenderCategory::ThreeD]);
        assert_eq!(host.frames, 1);
    }

    #[test]
    fn test_run_frames_stops_when_host_closes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut vm = game_vm(&log);
        let mut host = HeadlessHost::new(0.5);
        host.close_after = Some(3);

        assert_eq!(run_frames(&mut vm, &mut host, 10).unwrap(), 3);
        assert_eq!(vm.global("ticks"), Some(Value::Int(3)));
        assert_eq!(host.physics_time, 1.5);
        assert_eq!(log.lock().len(), 6);
    }

    #[test]
    fn test_frame_without_update_or_draw() {
        let mut c = Chunk::new();
        c.write_op(OpCode::Halt);
        let mut vm = VM::new();
        vm.load_chunk(c);
        let stats = step_frame(&mut vm, &mut HeadlessHost::default()).unwrap();
        assert!(!stats.updated && !stats.drawn);
        assert_eq!(stats.flushed, 0);
    }
}
