//! Uniform Set: the CPU mirror of the `ShaderParams` block declared by the
//! fragment templates in `compile`.
//!
//! One value is filled per frame and then specialised per pass (resolution,
//! channel metadata, output orientation) right before the pass is encoded.
use bytemuck::{Pod, Zeroable};
use chrono::{Datelike, Local, Timelike};
use effects::CustomUniform;

use crate::runtime::TimeSample;
use crate::types::{CHANNEL_COUNT, CUSTOM_UNIFORM_SLOTS};

/// std140 layout of `ShaderParams`.
///
/// Scalar arrays use a 16 byte stride in std140, so per-channel floats and
/// `vec3`s occupy a full `[f32; 4]` each.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadertoyUniforms {
    pub i_resolution: [f32; 3],
    pub i_time: f32,
    pub i_time_delta: f32,
    pub i_frame: i32,
    pub i_sample_rate: f32,
    pub i_flip_y: f32,
    pub i_mouse: [f32; 4],
    pub i_date: [f32; 4],
    pub i_channel_time: [[f32; 4]; CHANNEL_COUNT],
    pub i_channel_resolution: [[f32; 4]; CHANNEL_COUNT],
    pub i_custom: [[f32; 4]; CUSTOM_UNIFORM_SLOTS],
}

impl Default for ShadertoyUniforms {
    fn default() -> Self {
        Self {
            i_sample_rate: 44100.0,
            ..Zeroable::zeroed()
        }
    }
}

impl ShadertoyUniforms {
    pub fn set_resolution(&mut self, width: f32, height: f32) {
        self.i_resolution = [width, height, 1.0];
    }

    /// Screen passes flip `fragCoord` to a bottom-left origin; offscreen
    /// targets already store their bottom row first.
    pub fn set_flip_y(&mut self, flip: bool) {
        self.i_flip_y = if flip { 1.0 } else { 0.0 };
    }

    pub fn set_time(&mut self, sample: TimeSample) {
        self.i_time = sample.seconds;
        self.i_time_delta = sample.delta;
        self.i_frame = sample.frame_index.min(i32::MAX as u64) as i32;
    }

    pub fn set_mouse(&mut self, mouse: [f32; 4]) {
        self.i_mouse = mouse;
    }

    pub fn set_channel_resolution(&mut self, index: usize, resolution: [f32; 3]) {
        if let Some(slot) = self.i_channel_resolution.get_mut(index) {
            *slot = [resolution[0], resolution[1], resolution[2], 0.0];
        }
    }

    pub fn set_channel_time(&mut self, index: usize, seconds: f32) {
        if let Some(slot) = self.i_channel_time.get_mut(index) {
            slot[0] = seconds;
        }
    }

    pub fn channel_resolution(&self, index: usize) -> [f32; 3] {
        let [x, y, z, _] = self.i_channel_resolution[index];
        [x, y, z]
    }

    pub fn refresh_date(&mut self) {
        let local_now = Local::now();
        let seconds_since_midnight = local_now.num_seconds_from_midnight() as f32
            + local_now.nanosecond() as f32 / 1_000_000_000.0;
        self.i_date = [
            local_now.year() as f32,
            local_now.month() as f32,
            local_now.day() as f32,
            seconds_since_midnight,
        ];
    }
}

/// Name-addressed view over the custom uniform slots, handed to effect hooks.
pub struct CustomUniforms<'a> {
    names: &'a [CustomUniform],
    slots: &'a mut [[f32; 4]; CUSTOM_UNIFORM_SLOTS],
}

impl<'a> CustomUniforms<'a> {
    pub(crate) fn new(
        names: &'a [CustomUniform],
        slots: &'a mut [[f32; 4]; CUSTOM_UNIFORM_SLOTS],
    ) -> Self {
        Self { names, slots }
    }

    /// Writes `value` to the uniform called `name`.
    ///
    /// Returns `false` when the effect declares no such uniform.
    pub fn set(&mut self, name: &str, value: [f32; 4]) -> bool {
        let Some(index) = self.index_of(name) else {
            return false;
        };
        self.slots[index] = value;
        true
    }

    pub fn get(&self, name: &str) -> Option<[f32; 4]> {
        self.index_of(name).map(|index| self.slots[index])
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .take(CUSTOM_UNIFORM_SLOTS)
            .position(|uniform| uniform.name == name)
    }
}
