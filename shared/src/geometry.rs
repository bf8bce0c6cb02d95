///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    ///Value along the x-axis.
    pub x: f32,
    ///Value along the y-axis.
    /// Positive direction is down, matching screen coordinates of the playfield.
    pub y: f32,
}

impl Vector2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Vector2 { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector.
    /// A zero vector cannot be normalized and is returned as is.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            *self
        } else {
            Vector2 {
                x: self.x / mag,
                y: self.y / mag,
            }
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    ///Returns the difference `self - other`.
    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    ///Returns the distance between two points.
    pub fn distance(&self, other: &Vector2) -> f32 {
        self.sub(other).magnitude()
    }

    ///Clamps both components into `[0, width] x [0, height]`.
    /// NaN components end up at zero.
    pub fn clamp_to(&self, width: f32, height: f32) -> Vector2 {
        Vector2 {
            x: clamp_axis(self.x, width),
            y: clamp_axis(self.y, height),
        }
    }
}

fn clamp_axis(value: f32, max: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_magnitude() {
        assert_approx_eq!(Vector2::new(3.0, 4.0).magnitude(), 5.0);
        assert_eq!(Vector2::default().magnitude(), 0.0);
    }

    #[test]
    fn test_normalize() {
        let n = Vector2::new(10.0, 0.0).normalize();
        assert_approx_eq!(n.x, 1.0);
        assert_approx_eq!(n.y, 0.0);

        let diagonal = Vector2::new(-2.0, 2.0).normalize();
        assert_approx_eq!(diagonal.magnitude(), 1.0, 1e-6);
        assert!(diagonal.x < 0.0 && diagonal.y > 0.0);
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert_eq!(Vector2::default().normalize(), Vector2::default());
    }

    #[test]
    fn test_add_sub_scale() {
        let a = Vector2::new(1.0, 2.0);
        let b = Vector2::new(0.5, -1.0);
        assert_eq!(a.add(&b), Vector2::new(1.5, 1.0));
        assert_eq!(a.sub(&b), Vector2::new(0.5, 3.0));
        assert_eq!(a.scale(2.0), Vector2::new(2.0, 4.0));
        assert_approx_eq!(a.distance(&a), 0.0);
    }

    #[test]
    fn test_clamp_to() {
        let clamped = Vector2::new(-5.0, 1500.0).clamp_to(1000.0, 1000.0);
        assert_eq!(clamped, Vector2::new(0.0, 1000.0));

        let inside = Vector2::new(12.5, 999.0).clamp_to(1000.0, 1000.0);
        assert_eq!(inside, Vector2::new(12.5, 999.0));

        let nan = Vector2::new(f32::NAN, f32::INFINITY).clamp_to(10.0, 10.0);
        assert_eq!(nan, Vector2::new(0.0, 10.0));
    }
}
