// Fixed-arity helper opcodes: console, timing, math, geometry, strings,
// file handles, matrix multiply and the legacy game runtime

use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::files::FileMode;
use super::foreign::ForeignError;
use super::value::Value;
use super::vm::VM;
use crate::bytecode::{Chunk, OpCode};
use crate::error::{CyberError, CyberResult, ErrorKind};

/// Deterministic value noise in [-1, 1)
pub fn noise_2d(x: f64, y: f64) -> f64 {
    let xi = ((x * 0.1).floor() as i64) & 255;
    let yi = ((y * 0.1).floor() as i64) & 255;
    let h = (xi * 37 + yi * 97) * 971 + 1;
    (h % 1024) as f64 / 512.0 - 1.0
}

/// Text form used by `Str`: floats always carry six decimals
pub fn str_value(value: &Value) -> String {
    match value {
        Value::Float(f) => format!("{:.6}", f),
        other => other.to_text(),
    }
}

fn runtime_err(op: &str) -> impl FnOnce(ForeignError) -> CyberError + '_ {
    move |e| e.into_cyber_error(op)
}

impl VM {
    /// Pop `N` values, returned bottom-first
    fn pop_args<const N: usize>(&mut self, what: &str) -> CyberResult<[Value; N]> {
        self.require(N, what)?;
        let start = self.fiber.stack.len() - N;
        let mut drained = self.fiber.stack.drain(start..);
        Ok(std::array::from_fn(|_| drained.next().unwrap_or_default()))
    }

    fn pop_floats<const N: usize>(&mut self, what: &str) -> CyberResult<[f64; N]> {
        let args: [Value; N] = self.pop_args(what)?;
        Ok(args.map(|v| v.to_f64()))
    }

    fn math1(&mut self, what: &str, f: impl FnOnce(f64) -> f64) -> CyberResult<()> {
        let [x] = self.pop_floats::<1>(what)?;
        self.push(Value::Float(f(x)))
    }

    fn math2(&mut self, what: &str, f: impl FnOnce(f64, f64) -> f64) -> CyberResult<()> {
        let [a, b] = self.pop_floats::<2>(what)?;
        self.push(Value::Float(f(a, b)))
    }

    fn handle_arg(value: &Value) -> i64 {
        value.to_i64()
    }

    pub(super) fn intrinsic(&mut self, op: OpCode) -> CyberResult<()> {
        match op {
            // Console and conversion
            OpCode::Print => {
                let value = self.pop("Print")?;
                println!("{}", value.to_text());
            }
            OpCode::Str => {
                let text = str_value(self.peek(0, "Str")?);
                self.replace_top(1, Value::string(text));
            }
            OpCode::Int => {
                let n = self.peek(0, "Int")?.to_i64();
                self.replace_top(1, Value::Int(n));
            }

            // Randomness and time
            OpCode::Random => self.push(Value::Float(rand::random::<f64>()))?,
            OpCode::RandomN => {
                let n = self.peek(0, "RandomN")?.to_f64();
                self.replace_top(1, Value::Float(rand::random::<f64>() * n));
            }
            OpCode::Sleep => {
                let ms = self.pop("Sleep")?.to_i64();
                if ms > 0 {
                    thread::sleep(Duration::from_millis(ms as u64));
                }
            }
            OpCode::Timer => {
                let elapsed = self.timer_zero.elapsed().as_secs_f64();
                self.push(Value::Float(elapsed))?;
            }
            OpCode::ResetTimer => self.timer_zero = Instant::now(),

            // Math
            OpCode::Sin => self.math1("Sin", f64::sin)?,
            OpCode::Cos => self.math1("Cos", f64::cos)?,
            OpCode::Tan => self.math1("Tan", f64::tan)?,
            OpCode::Sqrt => self.math1("Sqrt", f64::sqrt)?,
            OpCode::Floor => self.math1("Floor", f64::floor)?,
            OpCode::Ceil => self.math1("Ceil", f64::ceil)?,
            OpCode::Round => self.math1("Round", f64::round)?,
            OpCode::Exp => self.math1("Exp", f64::exp)?,
            OpCode::Log => self.math1("Log", f64::ln)?,
            OpCode::Log10 => self.math1("Log10", f64::log10)?,
            OpCode::Deg2Rad => self.math1("Deg2Rad", f64::to_radians)?,
            OpCode::Rad2Deg => self.math1("Rad2Deg", f64::to_degrees)?,
            OpCode::Sign => self.math1("Sign", |x| {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            })?,
            OpCode::Abs => {
                let result = match self.peek(0, "Abs")? {
                    Value::Int(n) => Value::Int(n.wrapping_abs()),
                    other => Value::Float(other.to_f64().abs()),
                };
                self.replace_top(1, result);
            }
            OpCode::Min => self.math2("Min", f64::min)?,
            OpCode::Max => self.math2("Max", f64::max)?,
            OpCode::Pow => self.math2("Pow", f64::powf)?,
            OpCode::Noise2D => self.math2("Noise2D", noise_2d)?,
            // operands are pushed y then x
            OpCode::Atan2 => self.math2("Atan2", |y, x| y.atan2(x))?,
            OpCode::Lerp => {
                let [a, b, t] = self.pop_floats::<3>("Lerp")?;
                self.push(Value::Float(a + (b - a) * t))?;
            }
            OpCode::Clamp => {
                let [x, lo, hi] = self.pop_floats::<3>("Clamp")?;
                self.push(Value::Float(x.max(lo).min(hi)))?;
            }

            // Geometry
            OpCode::Distance2D => {
                let [x1, y1, x2, y2] = self.pop_floats::<4>("Distance2D")?;
                self.push(Value::Float((x2 - x1).hypot(y2 - y1)))?;
            }
            OpCode::DistSq2D => {
                let [x1, y1, x2, y2] = self.pop_floats::<4>("DistSq2D")?;
                let (dx, dy) = (x2 - x1, y2 - y1);
                self.push(Value::Float(dx * dx + dy * dy))?;
            }
            OpCode::Distance3D => {
                let [x1, y1, z1, x2, y2, z2] = self.pop_floats::<6>("Distance3D")?;
                let (dx, dy, dz) = (x2 - x1, y2 - y1, z2 - z1);
                self.push(Value::Float((dx * dx + dy * dy + dz * dz).sqrt()))?;
            }
            OpCode::DistSq3D => {
                let [x1, y1, z1, x2, y2, z2] = self.pop_floats::<6>("DistSq3D")?;
                let (dx, dy, dz) = (x2 - x1, y2 - y1, z2 - z1);
                self.push(Value::Float(dx * dx + dy * dy + dz * dz))?;
            }
            OpCode::InRadius2D => {
                let [x1, y1, x2, y2, r] = self.pop_floats::<5>("InRadius2D")?;
                let (dx, dy) = (x2 - x1, y2 - y1);
                self.push(Value::Bool(dx * dx + dy * dy <= r * r))?;
            }
            OpCode::InRadius3D => {
                let [x1, y1, z1, x2, y2, z2, r] = self.pop_floats::<7>("InRadius3D")?;
                let (dx, dy, dz) = (x2 - x1, y2 - y1, z2 - z1);
                self.push(Value::Bool(dx * dx + dy * dy + dz * dz <= r * r))?;
            }
            OpCode::Angle2D => {
                let [x1, y1, x2, y2] = self.pop_floats::<4>("Angle2D")?;
                self.push(Value::Float((y2 - y1).atan2(x2 - x1)))?;
            }

            // Strings
            OpCode::LeftStr => {
                let [s, n] = self.pop_args::<2>("Left")?;
                let n = n.to_i64().max(0) as usize;
                let out: String = s.to_text().chars().take(n).collect();
                self.push(Value::string(out))?;
            }
            OpCode::RightStr => {
                let [s, n] = self.pop_args::<2>("Right")?;
                let text = s.to_text();
                let total = text.chars().count();
                let n = (n.to_i64().max(0) as usize).min(total);
                let out: String = text.chars().skip(total - n).collect();
                self.push(Value::string(out))?;
            }
            OpCode::MidStr => {
                let [s, start, count] = self.pop_args::<3>("Mid")?;
                let skip = (start.to_i64().max(1) - 1) as usize;
                let count = count.to_i64().max(0) as usize;
                let out: String = s.to_text().chars().skip(skip).take(count).collect();
                self.push(Value::string(out))?;
            }
            OpCode::LenStr => {
                let n = self.peek(0, "Len")?.to_text().chars().count();
                self.replace_top(1, Value::Int(n as i64));
            }

            // Files
            OpCode::OpenFile => {
                let [path, mode] = self.pop_args::<2>("OpenFile")?;
                let code = mode.to_i64();
                let mode = FileMode::from_code(code)
                    .ok_or_else(|| CyberError::file_error(format!("invalid file mode: {}", code)))?;
                let handle = self.files.open(&path.to_text(), mode)?;
                self.push(Value::Int(handle))?;
            }
            OpCode::ReadLine => {
                let handle = Self::handle_arg(self.peek(0, "ReadLine")?);
                let line = self.files.read_line(handle)?;
                self.replace_top(1, Value::string(line));
            }
            OpCode::WriteLine => {
                let [handle, text] = self.pop_args::<2>("WriteLine")?;
                self.files.write_line(Self::handle_arg(&handle), &text.to_text())?;
            }
            OpCode::CloseFile => {
                let handle = Self::handle_arg(self.peek(0, "CloseFile")?);
                self.files.close(handle)?;
                self.fiber.stack.pop();
            }
            OpCode::Eof => {
                let handle = Self::handle_arg(self.peek(0, "EOF")?);
                let at_end = self.files.eof(handle);
                self.replace_top(1, Value::Bool(at_end));
            }

            legacy => self.legacy(legacy)?,
        }
        Ok(())
    }

    /// Legacy game opcodes. Without a runtime they consume their operands
    /// and do nothing.
    fn legacy(&mut self, op: OpCode) -> CyberResult<()> {
        let name = op.mnemonic();
        match op {
            OpCode::LoadImage | OpCode::LoadModel | OpCode::PlayMusic | OpCode::PlaySound
            | OpCode::LoadSound | OpCode::DrawSprite => {
                let [arg] = self.pop_args::<1>(&name)?;
                let arg = arg.to_text();
                if let Some(rt) = self.runtime.as_deref_mut() {
                    let done = match op {
                        OpCode::LoadImage => rt.load_image(&arg),
                        OpCode::LoadModel => rt.load_model(&arg),
                        OpCode::PlayMusic => rt.play_music(&arg),
                        OpCode::PlaySound => rt.play_sound(&arg),
                        OpCode::LoadSound => rt.load_sound(&arg),
                        _ => rt.draw_sprite(&arg),
                    };
                    done.map_err(runtime_err(&name))?;
                } else {
                    debug!(op = %name, "no game runtime attached");
                }
            }
            OpCode::CreateSprite => {
                let [id, image, x, y] = self.pop_args::<4>("CreateSprite")?;
                if let Some(rt) = self.runtime.as_deref_mut() {
                    rt.create_sprite(&id.to_text(), &image.to_text(), x.to_f64(), y.to_f64())
                        .map_err(runtime_err("CreateSprite"))?;
                }
            }
            OpCode::SetSpritePosition => {
                let [id, x, y] = self.pop_args::<3>("SetSpritePosition")?;
                if let Some(rt) = self.runtime.as_deref_mut() {
                    rt.set_sprite_position(&id.to_text(), x.to_f64(), y.to_f64())
                        .map_err(runtime_err("SetSpritePosition"))?;
                }
            }
            OpCode::CreateCamera | OpCode::SetCameraPosition => {
                let [id, x, y, z] = self.pop_args::<4>(&name)?;
                let (id, x, y, z) = (id.to_text(), x.to_f64(), y.to_f64(), z.to_f64());
                if let Some(rt) = self.runtime.as_deref_mut() {
                    let done = if op == OpCode::CreateCamera {
                        rt.create_camera(&id, x, y, z)
                    } else {
                        rt.set_camera_position(&id, x, y, z)
                    };
                    done.map_err(runtime_err(&name))?;
                }
            }
            OpCode::DrawModel => {
                let [id, x, y, z, scale] = self.pop_args::<5>("DrawModel")?;
                if let Some(rt) = self.runtime.as_deref_mut() {
                    rt.draw_model(&id.to_text(), x.to_f64(), y.to_f64(), z.to_f64(), scale.to_f64())
                        .map_err(runtime_err("DrawModel"))?;
                }
            }
            OpCode::CreatePhysicsBody => {
                let [id, kind, x, y, z, mass] = self.pop_args::<6>("CreatePhysicsBody")?;
                if let Some(rt) = self.runtime.as_deref_mut() {
                    rt.create_physics_body(
                        &id.to_text(),
                        &kind.to_text(),
                        [x.to_f64(), y.to_f64(), z.to_f64()],
                        mass.to_f64(),
                    )
                    .map_err(runtime_err("CreatePhysicsBody"))?;
                }
            }
            OpCode::SetVelocity | OpCode::ApplyForce => {
                let [id, x, y, z] = self.pop_args::<4>(&name)?;
                let v = [x.to_f64(), y.to_f64(), z.to_f64()];
                if let Some(rt) = self.runtime.as_deref_mut() {
                    let done = if op == OpCode::SetVelocity {
                        rt.set_velocity(&id.to_text(), v)
                    } else {
                        rt.apply_force(&id.to_text(), v)
                    };
                    done.map_err(runtime_err(&name))?;
                }
            }
            OpCode::RayCast3D => {
                let [ox, oy, oz, dx, dy, dz, max] = self.pop_floats::<7>("RayCast3D")?;
                let hit = match self.runtime.as_deref_mut() {
                    Some(rt) => rt
                        .ray_cast_3d([ox, oy, oz], [dx, dy, dz], max)
                        .map_err(runtime_err("RayCast3D"))?,
                    None => Default::default(),
                };
                self.push(Value::array(vec![
                    Value::Bool(hit.hit),
                    Value::Float(hit.x),
                    Value::Float(hit.y),
                    Value::Float(hit.z),
                ]))?;
            }
            OpCode::InitGraphics => {
                let [width, height, title] = self.pop_args::<3>("InitGraphics")?;
                if let Some(rt) = self.runtime.as_deref_mut() {
                    rt.initialize_graphics(width.to_i64(), height.to_i64(), &title.to_text())
                        .map_err(runtime_err("InitGraphics"))?;
                } else {
                    debug!("InitGraphics without a game runtime");
                }
            }
            OpCode::Sync => {
                if let Some(rt) = self.runtime.as_deref_mut() {
                    rt.sync().map_err(runtime_err("Sync"))?;
                }
            }
            OpCode::ShouldClose => {
                let close = self.runtime.as_deref().is_some_and(|rt| rt.should_close());
                self.push(Value::Bool(close))?;
            }
            _ => {
                return Err(CyberError::invalid_bytecode(format!(
                    "opcode {} is not executable here",
                    name
                )))
            }
        }
        Ok(())
    }

    /// `R = A * B` over three 2-D arrays named by constants
    pub(super) fn mat_mul(&mut self, chunk: &Chunk, r: &str, a: &str, b: &str) -> CyberResult<()> {
        let (a_arr, a_dims) = self.named_matrix(chunk, a)?;
        let (b_arr, b_dims) = self.named_matrix(chunk, b)?;
        let (r_arr, r_dims) = self.named_matrix(chunk, r)?;

        let (n, m, p) = (a_dims[0], a_dims[1], b_dims[1]);
        if b_dims[0] != m || r_dims[0] != n || r_dims[1] != p {
            return Err(CyberError::new(
                ErrorKind::DimensionMismatch,
                format!(
                    "MatMul: cannot multiply {:?} by {:?} into {:?}",
                    a_dims, b_dims, r_dims
                ),
            ));
        }

        // copy operands first so R may alias A or B
        let lhs: Vec<f64> = a_arr.lock().iter().map(Value::to_f64).collect();
        let rhs: Vec<f64> = b_arr.lock().iter().map(Value::to_f64).collect();
        let mut out = r_arr.lock();
        if lhs.len() != n * m || rhs.len() != m * p || out.len() != n * p {
            return Err(CyberError::new(
                ErrorKind::DimensionMismatch,
                "MatMul: array storage does not match its dimensions",
            ));
        }
        for i in 0..n {
            for j in 0..p {
                let sum: f64 = (0..m).map(|k| lhs[i * m + k] * rhs[k * p + j]).sum();
                out[i * p + j] = Value::Float(sum);
            }
        }
        Ok(())
    }

    fn named_matrix(
        &self,
        chunk: &Chunk,
        name: &str,
    ) -> CyberResult<(super::value::ArrayRef, [usize; 2])> {
        let slot = *chunk.variables.get(&name.to_lowercase()).ok_or_else(|| {
            CyberError::new(
                ErrorKind::UndefinedVariable,
                format!("MatMul: unknown array {}", name),
            )
        })?;
        let dims = match self.fiber.array_dims.get(&slot).map(Vec::as_slice) {
            Some([rows, cols]) => [*rows, *cols],
            _ => {
                return Err(CyberError::new(
                    ErrorKind::DimensionMismatch,
                    format!("MatMul: {} is not a 2-D array", name),
                ))
            }
        };
        match self.fiber.stack.get(slot) {
            Some(Value::Array(arr)) => Ok((arr.clone(), dims)),
            _ => Err(CyberError::type_error(format!(
                "MatMul: {} does not hold an array",
                name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_is_deterministic_and_bounded() {
        let a = noise_2d(12.5, -3.0);
        assert_eq!(a, noise_2d(12.5, -3.0));
        for (x, y) in [(0.0, 0.0), (100.0, 200.0), (-55.5, 9.0)] {
            let n = noise_2d(x, y);
            assert!((-1.0..1.0).contains(&n));
        }
        // h = 1 at the origin
        assert_eq!(noise_2d(0.0, 0.0), 1.0 / 512.0 - 1.0);
    }

    #[test]
    fn test_str_formats_floats_with_six_decimals() {
        assert_eq!(str_value(&Value::Float(1.5)), "1.500000");
        assert_eq!(str_value(&Value::Int(7)), "7");
        assert_eq!(str_value(&Value::Nil), "");
        assert_eq!(str_value(&Value::string("hi")), "hi");
    }
}
