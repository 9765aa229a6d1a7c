//! Madgwick IMU fusion, ported bit-for-bit from the reference tracker.

use crate::models::controller::ControllerState;

const SIN_1_4_PI: f32 = 0.707_106_77;
const COS_1_4_PI: f32 = 0.707_106_77;

const WARMUP_SAMPLES_COUNT: u32 = 30;
const BETA_WARMUP: f32 = 20.0;
const BETA_DEFAULT: f32 = 0.05;

/// A unit quaternion, (x, y, z, w).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Orientation {
    fn default() -> Self {
        // 90 degree rotation around X, the basis Madgwick converges toward.
        Self {
            x: SIN_1_4_PI,
            y: 0.0,
            z: 0.0,
            w: COS_1_4_PI,
        }
    }
}

impl Orientation {
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    /// One Madgwick update step.
    pub fn update(&mut self, gx: f32, gy: f32, gz: f32, ax: f32, ay: f32, az: f32, beta: f32, dt_sec: f32) {
        let (q0, q1, q2, q3) = (self.w, self.x, self.y, self.z);

        let mut q_dot1 = 0.5 * (-q1 * gx - q2 * gy - q3 * gz);
        let mut q_dot2 = 0.5 * (q0 * gx + q2 * gz - q3 * gy);
        let mut q_dot3 = 0.5 * (q0 * gy - q1 * gz + q3 * gx);
        let mut q_dot4 = 0.5 * (q0 * gz + q1 * gy - q2 * gx);

        if !(ax == 0.0 && ay == 0.0 && az == 0.0) {
            let mut recip_norm = 1.0 / (ax * ax + ay * ay + az * az).sqrt();
            let (ax, ay, az) = (ax * recip_norm, ay * recip_norm, az * recip_norm);

            let _2q0 = 2.0 * q0;
            let _2q1 = 2.0 * q1;
            let _2q2 = 2.0 * q2;
            let _2q3 = 2.0 * q3;
            let _4q0 = 4.0 * q0;
            let _4q1 = 4.0 * q1;
            let _4q2 = 4.0 * q2;
            let _8q1 = 8.0 * q1;
            let _8q2 = 8.0 * q2;
            let q0q0 = q0 * q0;
            let q1q1 = q1 * q1;
            let q2q2 = q2 * q2;
            let q3q3 = q3 * q3;

            let mut s0 = _4q0 * q2q2 + _2q2 * ax + _4q0 * q1q1 - _2q1 * ay;
            let mut s1 = _4q1 * q3q3 - _2q3 * ax + 4.0 * q0q0 * q1 - _2q0 * ay - _4q1 + _8q1 * q1q1 + _8q1 * q2q2 + _4q1 * az;
            let mut s2 = 4.0 * q0q0 * q2 + _2q0 * ax + _4q2 * q3q3 - _2q3 * ay - _4q2 + _8q2 * q1q1 + _8q2 * q2q2 + _4q2 * az;
            let mut s3 = 4.0 * q1q1 * q3 - _2q1 * ax + 4.0 * q2q2 * q3 - _2q2 * ay;
            recip_norm = s0 * s0 + s1 * s1 + s2 * s2 + s3 * s3;
            if recip_norm > 0.000_001 {
                recip_norm = 1.0 / recip_norm.sqrt();
                s0 *= recip_norm;
                s1 *= recip_norm;
                s2 *= recip_norm;
                s3 *= recip_norm;

                q_dot1 -= beta * s0;
                q_dot2 -= beta * s1;
                q_dot3 -= beta * s2;
                q_dot4 -= beta * s3;
            }
        }

        let mut q0 = q0 + q_dot1 * dt_sec;
        let mut q1 = q1 + q_dot2 * dt_sec;
        let mut q2 = q2 + q_dot3 * dt_sec;
        let mut q3 = q3 + q_dot4 * dt_sec;

        let recip_norm = 1.0 / (q0 * q0 + q1 * q1 + q2 * q2 + q3 * q3).sqrt();
        q0 *= recip_norm;
        q1 *= recip_norm;
        q2 *= recip_norm;
        q3 *= recip_norm;

        self.x = q1;
        self.y = q2;
        self.z = q3;
        self.w = q0;
    }
}

/// Tracks fused orientation plus the raw IMU samples and timing state
/// needed to drive [`Orientation::update`].
#[derive(Debug, Clone)]
pub struct OrientationTracker {
    pub gyro: (f32, f32, f32),
    pub accel: (f32, f32, f32),
    pub orient: Orientation,
    timestamp_us: u32,
    sample_index: u32,
}

impl Default for OrientationTracker {
    fn default() -> Self {
        Self {
            gyro: (0.0, 0.0, 0.0),
            accel: (0.0, 1.0, 0.0),
            orient: Orientation::default(),
            timestamp_us: 0,
            sample_index: 0,
        }
    }
}

impl OrientationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one IMU sample. `timestamp_us` is a free-running 32-bit
    /// microsecond counter which may wrap.
    pub fn update(&mut self, gx: f32, gy: f32, gz: f32, ax: f32, ay: f32, az: f32, timestamp_us: u32) {
        self.gyro = (gx, gy, gz);
        self.accel = (ax, ay, az);
        self.sample_index += 1;
        if self.sample_index <= 1 {
            self.timestamp_us = timestamp_us;
            return;
        }
        let mut delta_us = timestamp_us as u64;
        if delta_us < self.timestamp_us as u64 {
            delta_us += 1u64 << 32;
        }
        delta_us -= self.timestamp_us as u64;
        self.timestamp_us = timestamp_us;

        let beta = if self.sample_index < WARMUP_SAMPLES_COUNT {
            BETA_WARMUP
        } else {
            BETA_DEFAULT
        };
        self.orient
            .update(gx, gy, gz, ax, ay, az, beta, delta_us as f32 / 1_000_000.0);
    }

    /// Writes the fused sample into a controller state, applying the
    /// -90deg-about-X rotation the wire format expects.
    pub fn apply_to_controller_state(&self, state: &mut ControllerState) {
        const COS_NEG_1_4_PI: f32 = 0.707_106_77;
        const SIN_NEG_1_4_PI: f32 = -0.707_106_77;

        state.gyro = self.gyro;
        state.accel = self.accel;

        let o = &self.orient;
        state.orient_w = COS_NEG_1_4_PI * o.w - SIN_NEG_1_4_PI * o.x;
        state.orient_x = COS_NEG_1_4_PI * o.x + SIN_NEG_1_4_PI * o.w;
        state.orient_y = COS_NEG_1_4_PI * o.y - SIN_NEG_1_4_PI * o.z;
        state.orient_z = COS_NEG_1_4_PI * o.z + SIN_NEG_1_4_PI * o.y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_to_unit_quaternion_at_rest() {
        let mut tracker = OrientationTracker::new();
        let mut ts: u32 = 0;
        for _ in 0..30 {
            ts += 1000; // 1ms spacing
            tracker.update(0.0, 0.0, 0.0, 0.0, 1.0, 0.0, ts);
        }
        let mag = tracker.orient.magnitude();
        assert!((mag - 1.0).abs() < 1e-5, "magnitude {mag}");
    }

    #[test]
    fn timestamp_wraparound_handled() {
        let mut tracker = OrientationTracker::new();
        tracker.update(0.0, 0.0, 0.0, 0.0, 1.0, 0.0, u32::MAX - 500);
        // Wraps past u32::MAX; must not panic and must advance forward.
        tracker.update(0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 500);
        assert!(tracker.orient.magnitude().is_finite());
    }

    #[test]
    fn default_init_matches_90deg_x_rotation() {
        let o = Orientation::default();
        assert!((o.x - SIN_1_4_PI).abs() < 1e-6);
        assert!((o.w - COS_1_4_PI).abs() < 1e-6);
    }
}
