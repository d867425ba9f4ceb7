//! Light types for the scene

use crate::error::{EngineError, EngineResult};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

pub const MAX_POINT_LIGHTS: usize = 16;
pub const MAX_SPOT_LIGHTS: usize = 16;

/// Uniform light applied to every lit pixel
#[derive(Debug, Clone, Copy)]
pub struct AmbientLight {
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for AmbientLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }
}

/// Sun-like light; also the shadow caster
#[derive(Debug, Clone, Copy)]
pub struct DirectionalLight {
    pub color: Vec3,
    /// World-space direction pointing toward the light
    pub direction: Vec3,
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            direction: Vec3::Y,
            intensity: 1.0,
        }
    }
}

impl DirectionalLight {
    pub fn new(color: Vec3, direction: Vec3, intensity: f32) -> Self {
        Self {
            color,
            direction: direction.normalize_or_zero(),
            intensity,
        }
    }
}

/// `1 / (constant + linear * d + exponent * d^2)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attenuation {
    pub constant: f32,
    pub linear: f32,
    pub exponent: f32,
}

impl Default for Attenuation {
    fn default() -> Self {
        Self {
            constant: 0.0,
            linear: 0.0,
            exponent: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PointLight {
    pub color: Vec3,
    pub position: Vec3,
    pub intensity: f32,
    pub attenuation: Attenuation,
}

impl PointLight {
    pub fn new(color: Vec3, position: Vec3, intensity: f32) -> Self {
        Self {
            color,
            position,
            intensity,
            attenuation: Attenuation::default(),
        }
    }

    /// Convert to GPU data in view space
    pub fn to_gpu_data(&self, view: &Mat4) -> GpuPointLight {
        GpuPointLight {
            position: view.transform_point3(self.position).extend(self.intensity),
            color: self.color.extend(0.0),
            attenuation: Vec4::new(
                self.attenuation.constant,
                self.attenuation.linear,
                self.attenuation.exponent,
                0.0,
            ),
        }
    }
}

/// Point light restricted to a cone; cutoffs are half-angles in radians
#[derive(Debug, Clone, Copy)]
pub struct SpotLight {
    pub point: PointLight,
    pub direction: Vec3,
    pub inner_cutoff: f32,
    pub outer_cutoff: f32,
}

impl SpotLight {
    pub fn new(point: PointLight, direction: Vec3, inner_cutoff: f32, outer_cutoff: f32) -> Self {
        Self {
            point,
            direction: direction.normalize_or_zero(),
            inner_cutoff,
            outer_cutoff,
        }
    }

    pub fn to_gpu_data(&self, view: &Mat4) -> GpuSpotLight {
        GpuSpotLight {
            point: self.point.to_gpu_data(view),
            direction: view.transform_vector3(self.direction).extend(0.0),
            cutoff: Vec4::new(self.inner_cutoff.cos(), self.outer_cutoff.cos(), 0.0, 0.0),
        }
    }
}

/// Up to `N` lights of one kind
#[derive(Debug, Clone)]
pub struct LightSlots<T, const N: usize> {
    active: Vec<T>,
}

impl<T, const N: usize> Default for LightSlots<T, N> {
    fn default() -> Self {
        Self { active: Vec::new() }
    }
}

impl<T, const N: usize> LightSlots<T, N> {
    pub const CAPACITY: usize = N;

    pub fn push(&mut self, light: T) -> EngineResult<usize> {
        if self.active.len() >= N {
            return Err(EngineError::LightCapacity(N));
        }
        self.active.push(light);
        Ok(self.active.len() - 1)
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        (index < self.active.len()).then(|| self.active.remove(index))
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn active(&self) -> &[T] {
        &self.active
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.active.get_mut(index)
    }

    /// All `N` slots converted to GPU data; unused slots are zeroed
    pub fn gpu_slots<G: Zeroable + Copy>(&self, convert: impl Fn(&T) -> G) -> [G; N] {
        let mut slots = [G::zeroed(); N];
        for (slot, light) in slots.iter_mut().zip(&self.active) {
            *slot = convert(light);
        }
        slots
    }
}

/// All lights of a scene
#[derive(Debug, Clone, Default)]
pub struct SceneLights {
    pub ambient: AmbientLight,
    pub directional: DirectionalLight,
    pub points: LightSlots<PointLight, MAX_POINT_LIGHTS>,
    pub spots: LightSlots<SpotLight, MAX_SPOT_LIGHTS>,
}

impl SceneLights {
    /// Lighting constants with every position and direction in view space
    pub fn uniform_data(&self, view: &Mat4) -> LightsUniformData {
        let direction = view.transform_vector3(self.directional.direction).normalize_or_zero();
        LightsUniformData {
            ambient: self.ambient.color.extend(self.ambient.intensity),
            directional_color: self.directional.color.extend(self.directional.intensity),
            directional_direction: direction.extend(0.0),
            point_lights: self.points.gpu_slots(|p| p.to_gpu_data(view)),
            spot_lights: self.spots.gpu_slots(|s| s.to_gpu_data(view)),
            counts: [self.points.len() as u32, self.spots.len() as u32, 0, 0],
        }
    }
}

/// Point light data for GPU
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuPointLight {
    /// xyz = view-space position, w = intensity
    pub position: Vec4,
    pub color: Vec4,
    /// x = constant, y = linear, z = exponent
    pub attenuation: Vec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuSpotLight {
    pub point: GpuPointLight,
    pub direction: Vec4,
    /// x = cos(inner), y = cos(outer)
    pub cutoff: Vec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightsUniformData {
    pub ambient: Vec4,
    pub directional_color: Vec4,
    pub directional_direction: Vec4,
    pub point_lights: [GpuPointLight; MAX_POINT_LIGHTS],
    pub spot_lights: [GpuSpotLight; MAX_SPOT_LIGHTS],
    pub counts: [u32; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_enforced() {
        let mut slots = LightSlots::<PointLight, 2>::default();
        let light = PointLight::new(Vec3::ONE, Vec3::ZERO, 1.0);
        slots.push(light).unwrap();
        slots.push(light).unwrap();
        assert!(matches!(slots.push(light), Err(EngineError::LightCapacity(2))));
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn unused_slots_are_zeroed() {
        let mut lights = SceneLights::default();
        lights
            .points
            .push(PointLight::new(Vec3::X, Vec3::new(0.0, 0.0, -3.0), 2.0))
            .unwrap();

        let data = lights.uniform_data(&Mat4::IDENTITY);
        assert_eq!(data.counts[0], 1);
        assert_eq!(data.point_lights[0].position, Vec4::new(0.0, 0.0, -3.0, 2.0));
        assert!(data.point_lights[1..]
            .iter()
            .all(|p| p.position == Vec4::ZERO && p.color == Vec4::ZERO));
        assert!(data.spot_lights.iter().all(|s| s.point.position.w == 0.0));
    }

    #[test]
    fn directions_move_to_view_space() {
        let mut lights = SceneLights::default();
        lights
            .spots
            .push(SpotLight::new(
                PointLight::new(Vec3::ONE, Vec3::new(5.0, 0.0, 0.0), 1.0),
                -Vec3::Y,
                0.2,
                0.4,
            ))
            .unwrap();

        let view = Mat4::from_translation(Vec3::new(-5.0, 0.0, 0.0));
        let data = lights.uniform_data(&view);
        assert!(data.spot_lights[0].point.position.truncate().length() < 1e-6);
        assert_eq!(data.spot_lights[0].direction, Vec4::new(0.0, -1.0, 0.0, 0.0));
        assert_eq!(data.directional_direction, Vec4::new(0.0, 1.0, 0.0, 0.0));
        assert!((data.spot_lights[0].cutoff.x - 0.2f32.cos()).abs() < 1e-6);
    }
}
