#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Position/rotation/scale of a single node. Mutable in place, exclusively
/// owned by its node; children compose against it only while rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform2D {
    pub position: Vec2,
    pub rotation_degrees: f32,
    pub scale: Vec2,
}

impl Default for Transform2D {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            rotation_degrees: 0.0,
            scale: Vec2 { x: 1.0, y: 1.0 },
        }
    }
}

impl Transform2D {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            position: Vec2 { x, y },
            ..Self::default()
        }
    }
}

/// Whole multiples of a full turn collapse to exactly zero so that
/// 360-degree wraps stay lossless through the radian conversion.
pub(crate) fn normalize_degrees(degrees: f32) -> f32 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped == 0.0 {
        0.0
    } else {
        wrapped
    }
}

/// 2D affine matrix in row-major layout:
///
/// ```text
/// | m00 m01 tx |
/// | m10 m11 ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat2D {
    pub m00: f32,
    pub m01: f32,
    pub m10: f32,
    pub m11: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for Mat2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat2D {
    pub const IDENTITY: Mat2D = Mat2D {
        m00: 1.0,
        m01: 0.0,
        m10: 0.0,
        m11: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn translation(x: f32, y: f32) -> Self {
        Self {
            tx: x,
            ty: y,
            ..Self::IDENTITY
        }
    }

    pub fn rotation_degrees(degrees: f32) -> Self {
        let radians = normalize_degrees(degrees).to_radians();
        let (sin, cos) = radians.sin_cos();
        Self {
            m00: cos,
            m01: -sin,
            m10: sin,
            m11: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn scaling(sx: f32, sy: f32) -> Self {
        Self {
            m00: sx,
            m11: sy,
            ..Self::IDENTITY
        }
    }

    /// `self * rhs`: applies `rhs` first, then `self`.
    pub fn then(&self, rhs: &Mat2D) -> Mat2D {
        Mat2D {
            m00: self.m00 * rhs.m00 + self.m01 * rhs.m10,
            m01: self.m00 * rhs.m01 + self.m01 * rhs.m11,
            m10: self.m10 * rhs.m00 + self.m11 * rhs.m10,
            m11: self.m10 * rhs.m01 + self.m11 * rhs.m11,
            tx: self.m00 * rhs.tx + self.m01 * rhs.ty + self.tx,
            ty: self.m10 * rhs.tx + self.m11 * rhs.ty + self.ty,
        }
    }

    pub fn apply(&self, point: Vec2) -> Vec2 {
        Vec2 {
            x: self.m00 * point.x + self.m01 * point.y + self.tx,
            y: self.m10 * point.x + self.m11 * point.y + self.ty,
        }
    }

    pub fn determinant(&self) -> f32 {
        self.m00 * self.m11 - self.m01 * self.m10
    }

    pub fn invert(&self) -> Option<Mat2D> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() <= f32::EPSILON {
            return None;
        }
        let inv_det = det.recip();
        let m00 = self.m11 * inv_det;
        let m01 = -self.m01 * inv_det;
        let m10 = -self.m10 * inv_det;
        let m11 = self.m00 * inv_det;
        Some(Mat2D {
            m00,
            m01,
            m10,
            m11,
            tx: -(m00 * self.tx + m01 * self.ty),
            ty: -(m10 * self.tx + m11 * self.ty),
        })
    }

    /// Composes translate, then rotate, then scale, in that fixed order.
    pub fn from_transform(transform: &Transform2D) -> Mat2D {
        Mat2D::translation(transform.position.x, transform.position.y)
            .then(&Mat2D::rotation_degrees(transform.rotation_degrees))
            .then(&Mat2D::scaling(transform.scale.x, transform.scale.y))
    }
}

/// Save/restore stack over the current transformation. The drawing context,
/// not the material layer, owns push/pop discipline.
#[derive(Debug, Clone)]
pub struct MatrixStack {
    current: Mat2D,
    saved: Vec<Mat2D>,
}

impl Default for MatrixStack {
    fn default() -> Self {
        Self::new(Mat2D::IDENTITY)
    }
}

impl MatrixStack {
    pub fn new(base: Mat2D) -> Self {
        Self {
            current: base,
            saved: Vec::new(),
        }
    }

    pub fn current(&self) -> &Mat2D {
        &self.current
    }

    pub fn depth(&self) -> usize {
        self.saved.len()
    }

    pub fn push(&mut self) {
        self.saved.push(self.current);
    }

    /// Unbalanced pops are integrator bugs, not runtime conditions.
    pub fn pop(&mut self) {
        debug_assert!(!self.saved.is_empty(), "matrix stack pop without push");
        if let Some(saved) = self.saved.pop() {
            self.current = saved;
        }
    }

    pub fn translate(&mut self, x: f32, y: f32) {
        self.current = self.current.then(&Mat2D::translation(x, y));
    }

    pub fn rotate_degrees(&mut self, degrees: f32) {
        self.current = self.current.then(&Mat2D::rotation_degrees(degrees));
    }

    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.current = self.current.then(&Mat2D::scaling(sx, sy));
    }

    pub fn apply_transform(&mut self, transform: &Transform2D) {
        self.translate(transform.position.x, transform.position.y);
        self.rotate_degrees(transform.rotation_degrees);
        self.scale(transform.scale.x, transform.scale.y);
    }
}
