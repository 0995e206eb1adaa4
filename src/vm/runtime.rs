// Legacy game runtime contract used by the fixed game opcodes.
// New capabilities should be exposed as foreign functions instead.

use super::foreign::ForeignError;

pub type RuntimeResult<T = ()> = Result<T, ForeignError>;

/// Result of a 3D ray cast
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RayHit {
    pub hit: bool,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Host primitives behind the legacy opcodes. Every method has a no-op
/// default so a host only implements what it supports.
pub trait GameRuntime {
    fn load_image(&mut self, _path: &str) -> RuntimeResult {
        Ok(())
    }

    fn create_sprite(&mut self, _id: &str, _image: &str, _x: f64, _y: f64) -> RuntimeResult {
        Ok(())
    }

    fn set_sprite_position(&mut self, _id: &str, _x: f64, _y: f64) -> RuntimeResult {
        Ok(())
    }

    fn draw_sprite(&mut self, _id: &str) -> RuntimeResult {
        Ok(())
    }

    fn load_model(&mut self, _path: &str) -> RuntimeResult {
        Ok(())
    }

    fn create_camera(&mut self, _id: &str, _x: f64, _y: f64, _z: f64) -> RuntimeResult {
        Ok(())
    }

    fn set_camera_position(&mut self, _id: &str, _x: f64, _y: f64, _z: f64) -> RuntimeResult {
        Ok(())
    }

    fn draw_model(&mut self, _id: &str, _x: f64, _y: f64, _z: f64, _scale: f64) -> RuntimeResult {
        Ok(())
    }

    fn play_music(&mut self, _path: &str) -> RuntimeResult {
        Ok(())
    }

    fn play_sound(&mut self, _path: &str) -> RuntimeResult {
        Ok(())
    }

    fn load_sound(&mut self, _path: &str) -> RuntimeResult {
        Ok(())
    }

    fn create_physics_body(
        &mut self,
        _id: &str,
        _body_type: &str,
        _position: [f64; 3],
        _mass: f64,
    ) -> RuntimeResult {
        Ok(())
    }

    fn set_velocity(&mut self, _id: &str, _velocity: [f64; 3]) -> RuntimeResult {
        Ok(())
    }

    fn apply_force(&mut self, _id: &str, _force: [f64; 3]) -> RuntimeResult {
        Ok(())
    }

    fn ray_cast_3d(
        &mut self,
        _origin: [f64; 3],
        _direction: [f64; 3],
        _max_distance: f64,
    ) -> RuntimeResult<RayHit> {
        Ok(RayHit::default())
    }

    fn initialize_graphics(&mut self, _width: i64, _height: i64, _title: &str) -> RuntimeResult {
        Ok(())
    }

    /// True once the user asked to close the window
    fn should_close(&self) -> bool {
        false
    }

    /// Finish one frame: present and wait for the target frame rate
    fn sync(&mut self) -> RuntimeResult {
        Ok(())
    }

    fn is_key_down(&self, _key: &str) -> bool {
        false
    }

    fn is_key_pressed(&self, _key: &str) -> bool {
        false
    }
}
