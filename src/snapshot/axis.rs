//! Output coordinate-system mapping.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::{Result, StreamError};

/// A physical direction in the capture volume (server frame is Z-up: Forward = +X,
/// Left = +Y, Up = +Z).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    fn unit(self) -> Vector3<f64> {
        match self {
            Direction::Forward => Vector3::x(),
            Direction::Backward => -Vector3::x(),
            Direction::Left => Vector3::y(),
            Direction::Right => -Vector3::y(),
            Direction::Up => Vector3::z(),
            Direction::Down => -Vector3::z(),
        }
    }
}

/// Which physical direction each output axis points in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisMapping {
    axes: [Direction; 3],
    rotation: UnitQuaternion<f64>,
    matrix: Matrix3<f64>,
}

impl Default for AxisMapping {
    fn default() -> Self {
        Self::z_up()
    }
}

impl AxisMapping {
    /// Validate and build a mapping.
    ///
    /// Rejects co-linear axes and left-handed results.
    pub fn new(x: Direction, y: Direction, z: Direction) -> Result<Self> {
        let rows = [x.unit(), y.unit(), z.unit()];
        for (i, j) in [(0, 1), (0, 2), (1, 2)] {
            if rows[i].dot(&rows[j]).abs() > 0.5 {
                return Err(StreamError::InvalidAxisMapping {
                    reason: format!("{:?} and {:?} are co-linear", [x, y, z][i], [x, y, z][j]),
                });
            }
        }
        let matrix = Matrix3::from_rows(&[rows[0].transpose(), rows[1].transpose(), rows[2].transpose()]);
        if matrix.determinant() < 0.0 {
            return Err(StreamError::InvalidAxisMapping {
                reason: format!("({:?}, {:?}, {:?}) is left-handed", x, y, z),
            });
        }
        let rotation =
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(matrix));
        Ok(Self { axes: [x, y, z], rotation, matrix })
    }

    /// The server's native frame.
    pub fn z_up() -> Self {
        Self {
            axes: [Direction::Forward, Direction::Left, Direction::Up],
            rotation: UnitQuaternion::identity(),
            matrix: Matrix3::identity(),
        }
    }

    /// Y-up, right-handed.
    pub fn y_up() -> Self {
        // Forward/Up/Right is a proper rotation of the native frame.
        match Self::new(Direction::Forward, Direction::Up, Direction::Right) {
            Ok(mapping) => mapping,
            Err(_) => Self::z_up(),
        }
    }

    pub fn axes(&self) -> [Direction; 3] {
        self.axes
    }

    pub fn is_identity(&self) -> bool {
        self.matrix == Matrix3::identity()
    }

    pub fn map_translation(&self, translation: [f64; 3]) -> [f64; 3] {
        let mapped = self.matrix * Vector3::from(translation);
        [mapped.x, mapped.y, mapped.z]
    }

    pub fn map_rotation(&self, rotation: UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        self.rotation * rotation * self.rotation.inverse()
    }
}
