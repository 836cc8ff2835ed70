use glam::Vec3;

/// Oriented plane in Hessian normal form: points with `dot(n, p) > d` lie
/// in the positive half-space and are clipped away.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub offset: f32,
}

impl Plane {
    pub fn new(normal: Vec3, offset: f32) -> Self {
        Self { normal, offset }
    }

    /// Signed distance of a point; positive means clipped
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) - self.offset
    }

    /// Same plane with a unit-length normal
    pub fn normalized(&self) -> Self {
        let len = self.normal.length();
        if len <= f32::EPSILON {
            return *self;
        }
        Self {
            normal: self.normal / len,
            offset: self.offset / len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_distance() {
        let plane = Plane::new(Vec3::X, 0.5);
        assert!(plane.signed_distance(Vec3::new(0.75, 0.0, 0.0)) > 0.0);
        assert!(plane.signed_distance(Vec3::new(0.25, 0.0, 0.0)) < 0.0);
        assert_eq!(plane.signed_distance(Vec3::new(0.5, 3.0, -2.0)), 0.0);
    }
}
