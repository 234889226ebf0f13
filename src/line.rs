use crate::error::{Error, Result};
use nalgebra as na;

/// Which side of a [`VirtualLine`] a point lies on.
///
/// `Negative` is side A and `Positive` is side B. A point exactly on the line
/// has no side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Negative,
    OnLine,
    Positive,
}

impl Side {
    #[inline]
    pub fn from_distance(s: f32) -> Self {
        if s > 0.0 {
            Side::Positive
        } else if s < 0.0 {
            Side::Negative
        } else {
            Side::OnLine
        }
    }

    #[inline]
    pub fn is_known(self) -> bool {
        self != Side::OnLine
    }
}

/// Counting boundary in frame-pixel coordinates.
///
/// The normal is the left-hand perpendicular of `p2 - p1`. In image
/// coordinates (y pointing down) a line drawn left to right therefore has its
/// positive side above it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualLine {
    p1: na::Point2<f32>,
    p2: na::Point2<f32>,
    normal: na::Unit<na::Vector2<f32>>,
}

impl VirtualLine {
    pub fn new(p1: na::Point2<f32>, p2: na::Point2<f32>) -> Result<Self> {
        let dir = p2 - p1;

        if !dir.iter().all(|c| c.is_finite()) {
            return Err(Error::InvalidLine(format!(
                "non-finite endpoints {:?} -> {:?}",
                p1, p2
            )));
        }

        let normal = na::Unit::try_new(na::Vector2::new(dir.y, -dir.x), f32::EPSILON)
            .ok_or_else(|| {
                Error::InvalidLine(format!("degenerate line, both endpoints at {:?}", p1))
            })?;

        Ok(Self { p1, p2, normal })
    }

    /// Full-width horizontal line at `fraction` of the frame height.
    pub fn horizontal(dims: (u32, u32), fraction: f32) -> Result<Self> {
        check_fraction(fraction)?;
        let (fw, fh) = (dims.0 as f32, dims.1 as f32);
        let y = (fh * fraction).floor();

        Self::new(na::Point2::new(0.0, y), na::Point2::new(fw, y))
    }

    /// Full-height vertical line at `fraction` of the frame width.
    pub fn vertical(dims: (u32, u32), fraction: f32) -> Result<Self> {
        check_fraction(fraction)?;
        let (fw, fh) = (dims.0 as f32, dims.1 as f32);
        let x = (fw * fraction).floor();

        Self::new(na::Point2::new(x, 0.0), na::Point2::new(x, fh))
    }

    #[inline]
    pub fn endpoints(&self) -> (na::Point2<f32>, na::Point2<f32>) {
        (self.p1, self.p2)
    }

    #[inline]
    pub fn normal(&self) -> &na::Unit<na::Vector2<f32>> {
        &self.normal
    }

    #[inline]
    pub fn signed_distance(&self, p: &na::Point2<f32>) -> f32 {
        self.normal.dot(&(p - self.p1))
    }

    #[inline]
    pub fn side(&self, p: &na::Point2<f32>) -> Side {
        Side::from_distance(self.signed_distance(p))
    }
}

fn check_fraction(fraction: f32) -> Result<()> {
    if fraction > 0.0 && fraction < 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidLine(format!(
            "line position {} is outside the frame",
            fraction
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_line_is_rejected() {
        let p = na::Point2::new(5.0, 5.0);
        assert!(matches!(VirtualLine::new(p, p), Err(Error::InvalidLine(_))));

        let nan = na::Point2::new(f32::NAN, 0.0);
        assert!(VirtualLine::new(nan, p).is_err());
    }

    #[test]
    fn signed_distance_is_in_pixels() {
        let line =
            VirtualLine::new(na::Point2::new(0.0, 100.0), na::Point2::new(200.0, 100.0)).unwrap();

        assert_eq!(line.signed_distance(&na::Point2::new(50.0, 90.0)), 10.0);
        assert_eq!(line.signed_distance(&na::Point2::new(50.0, 130.0)), -30.0);
        assert_eq!(line.side(&na::Point2::new(50.0, 90.0)), Side::Positive);
        assert_eq!(line.side(&na::Point2::new(50.0, 130.0)), Side::Negative);
        assert_eq!(line.side(&na::Point2::new(10.0, 100.0)), Side::OnLine);
    }

    #[test]
    fn reversing_endpoints_flips_sides() {
        let a = na::Point2::new(0.0, 0.0);
        let b = na::Point2::new(10.0, 10.0);
        let p = na::Point2::new(0.0, 10.0);

        let forward = VirtualLine::new(a, b).unwrap();
        let backward = VirtualLine::new(b, a).unwrap();

        assert_eq!(forward.side(&p), Side::Negative);
        assert_eq!(backward.side(&p), Side::Positive);
    }

    #[test]
    fn frame_presets() {
        let h = VirtualLine::horizontal((640, 480), 0.5).unwrap();
        assert_eq!(
            h.endpoints(),
            (na::Point2::new(0.0, 240.0), na::Point2::new(640.0, 240.0))
        );

        let v = VirtualLine::vertical((640, 480), 0.25).unwrap();
        assert_eq!(v.endpoints().0, na::Point2::new(160.0, 0.0));

        assert!(VirtualLine::horizontal((640, 480), 1.0).is_err());
        assert!(VirtualLine::vertical((640, 480), 0.0).is_err());
    }
}
