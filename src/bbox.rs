use nalgebra as na;
use std::marker::PhantomData;

pub trait BBoxFormat: std::fmt::Debug + Copy {}

/// Left-top-right-bottom format, contains left top and right bottom corners
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

/// X-y-width-height format, contains coordinates of the center of bbox and width-height
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Xywh;
impl BBoxFormat for Xywh {}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BBox<F: BBoxFormat>([f32; 4], PhantomData<F>);

impl<F: BBoxFormat> From<BBox<F>> for [f32; 4] {
    fn from(bbox: BBox<F>) -> Self {
        bbox.0
    }
}

impl<F: BBoxFormat> BBox<F> {
    #[inline]
    pub fn as_slice(&self) -> &[f32; 4] {
        &self.0
    }
}

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(x1: f32, x2: f32, x3: f32, x4: f32) -> Self {
        BBox([x1, x2, x3, x4], PhantomData)
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.0[3]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        (self.0[2] - self.0[0]).max(0.0)
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        (self.0[3] - self.0[1]).max(0.0)
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    #[inline]
    pub fn center(&self) -> na::Point2<f32> {
        na::Point2::new(
            (self.0[0] + self.0[2]) * 0.5,
            (self.0[1] + self.0[3]) * 0.5,
        )
    }

    #[inline]
    pub fn as_xywh(&self) -> BBox<Xywh> {
        self.into()
    }

    #[inline]
    pub fn translate(&self, offset: &na::Vector2<f32>) -> Self {
        BBox::ltrb(
            self.0[0] + offset.x,
            self.0[1] + offset.y,
            self.0[2] + offset.x,
            self.0[3] + offset.y,
        )
    }

    /// Intersection over union; zero for boxes without area.
    pub fn iou(&self, other: &BBox<Ltrb>) -> f32 {
        let i_w = (self.right().min(other.right()) - self.left().max(other.left())).max(0.0);
        let i_h = (self.bottom().min(other.bottom()) - self.top().max(other.top())).max(0.0);
        let i_area = i_w * i_h;
        let union = self.area() + other.area() - i_area;

        if union <= f32::EPSILON {
            return 0.0;
        }

        i_area / union
    }
}

impl BBox<Xywh> {
    #[inline]
    pub fn xywh(x1: f32, x2: f32, x3: f32, x4: f32) -> Self {
        BBox([x1, x2, x3, x4], PhantomData)
    }

    #[inline(always)]
    pub fn as_ltrb(&self) -> BBox<Ltrb> {
        self.into()
    }

    #[inline(always)]
    pub fn cx(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn cy(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.0[3]
    }
}

impl<'a> From<&'a BBox<Xywh>> for BBox<Ltrb> {
    #[inline]
    fn from(v: &'a BBox<Xywh>) -> Self {
        let (w2, h2) = (v.0[2] / 2.0, v.0[3] / 2.0);

        Self([v.0[0] - w2, v.0[1] - h2, v.0[0] + w2, v.0[1] + h2], PhantomData)
    }
}

impl<'a> From<&'a BBox<Ltrb>> for BBox<Xywh> {
    #[inline]
    fn from(v: &'a BBox<Ltrb>) -> Self {
        let (w, h) = (v.0[2] - v.0[0], v.0[3] - v.0[1]);

        Self([v.0[0] + w / 2.0, v.0[1] + h / 2.0, w, h], PhantomData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BBox::ltrb(10.0, 10.0, 50.0, 30.0);
        assert_relative_eq!(b.iou(&b), 1.0);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BBox::ltrb(0.0, 0.0, 10.0, 10.0);
        let b = BBox::ltrb(20.0, 20.0, 30.0, 30.0);
        assert_relative_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_of_half_shifted_boxes() {
        let a = BBox::ltrb(0.0, 0.0, 10.0, 10.0);
        let b = BBox::ltrb(5.0, 0.0, 15.0, 10.0);
        // intersection 50, union 150
        assert_relative_eq!(a.iou(&b), 1.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn degenerate_box_has_zero_iou() {
        let a = BBox::ltrb(5.0, 5.0, 5.0, 5.0);
        assert_relative_eq!(a.iou(&a), 0.0);
    }

    #[test]
    fn xywh_ltrb_conversion() {
        let b = BBox::xywh(20.0, 10.0, 8.0, 4.0).as_ltrb();
        assert_eq!(b.as_slice(), &[16.0, 8.0, 24.0, 12.0]);

        let back = b.as_xywh();
        assert_eq!(back.as_slice(), &[20.0, 10.0, 8.0, 4.0]);
        assert_relative_eq!(b.center().x, 20.0);
        assert_relative_eq!(b.center().y, 10.0);
    }

    #[test]
    fn translate_moves_all_edges() {
        let b = BBox::ltrb(0.0, 0.0, 2.0, 2.0).translate(&na::Vector2::new(3.0, -1.0));
        assert_eq!(b.as_slice(), &[3.0, -1.0, 5.0, 1.0]);
    }
}
