//! Pointer-to-canvas coordinate mapping.
//!
//! Canvas space is the background image's own extent normalized to the unit
//! square: `(0, 0)` is the image's top-left corner and `(1, 1)` its
//! bottom-right, whatever size the image is currently drawn at. A stored pin
//! therefore lands on the same spot of the image after the viewport is
//! resized, zoomed, or the image is swapped for a higher resolution copy.

use kurbo::{Affine, Point, Rect, Size};

/// Maps between screen points and canvas space for one rendering of the
/// background image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    /// Screen rectangle the image currently occupies.
    rendered: Rect,
}

impl CoordinateMapper {
    /// Create a mapper for an image drawn into `rendered`.
    pub fn new(rendered: Rect) -> Self {
        Self { rendered }
    }

    /// Create a mapper for an image of `image_size` letterboxed into
    /// `container` (CSS `object-fit: contain`).
    pub fn contain(container: Rect, image_size: Size) -> Self {
        Self::new(contain_rect(container, image_size))
    }

    /// The rectangle the image is drawn into.
    pub fn rendered(&self) -> Rect {
        self.rendered
    }

    /// Update after the image was re-laid out.
    pub fn set_rendered(&mut self, rendered: Rect) {
        self.rendered = rendered;
    }

    /// Transform from canvas space to screen space.
    pub fn transform(&self) -> Affine {
        let rect = self.rendered;
        Affine::translate(rect.origin().to_vec2())
            * Affine::scale_non_uniform(rect.width(), rect.height())
    }

    /// Convert a pointer position to canvas space.
    ///
    /// Points outside the rendered rectangle map outside `0..=1`. An axis with
    /// zero extent maps to 0.
    pub fn to_canvas(&self, pointer: Point) -> Point {
        let rect = self.rendered;
        Point::new(
            normalize(pointer.x, rect.x0, rect.width()),
            normalize(pointer.y, rect.y0, rect.height()),
        )
    }

    /// Convert a canvas-space position to the screen, e.g. to place a marker.
    pub fn to_screen(&self, canvas_point: Point) -> Point {
        self.transform() * canvas_point
    }
}

fn normalize(value: f64, origin: f64, extent: f64) -> f64 {
    if extent.abs() < f64::EPSILON {
        0.0
    } else {
        (value - origin) / extent
    }
}

/// Rectangle an image of `image_size` occupies when scaled to fit inside
/// `container` while keeping its aspect ratio, centered.
pub fn contain_rect(container: Rect, image_size: Size) -> Rect {
    if image_size.width <= 0.0 || image_size.height <= 0.0 {
        return container;
    }
    let scale = (container.width() / image_size.width).min(container.height() / image_size.height);
    let size = Size::new(image_size.width * scale, image_size.height * scale);
    let center = container.center();
    Rect::from_center_size(center, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point, b: Point) {
        assert!((a.x - b.x).abs() < 1e-9, "{a:?} != {b:?}");
        assert!((a.y - b.y).abs() < 1e-9, "{a:?} != {b:?}");
    }

    #[test]
    fn test_corners_map_to_unit_square() {
        let mapper = CoordinateMapper::new(Rect::new(100.0, 50.0, 500.0, 350.0));
        assert_close(mapper.to_canvas(Point::new(100.0, 50.0)), Point::ZERO);
        assert_close(mapper.to_canvas(Point::new(500.0, 350.0)), Point::new(1.0, 1.0));
        assert_close(mapper.to_canvas(Point::new(300.0, 200.0)), Point::new(0.5, 0.5));
    }

    #[test]
    fn test_roundtrip_across_rescale() {
        let before = CoordinateMapper::new(Rect::new(10.0, 20.0, 810.0, 620.0));
        let pointer = Point::new(210.0, 470.0);
        let canvas = before.to_canvas(pointer);

        // Same image, window resized and scrolled.
        let after = CoordinateMapper::new(Rect::new(-40.0, 0.0, 1560.0, 1200.0));
        let on_screen = after.to_screen(canvas);

        // Relative position inside the image is preserved...
        let rel_before = pointer - before.rendered().origin();
        let rel_after = on_screen - after.rendered().origin();
        assert!((rel_before.x / 800.0 - rel_after.x / 1600.0).abs() < 1e-9);
        assert!((rel_before.y / 600.0 - rel_after.y / 1200.0).abs() < 1e-9);

        // ...and mapping it back yields the same canvas point.
        assert_close(after.to_canvas(on_screen), canvas);
    }

    #[test]
    fn test_outside_rect_is_not_clamped() {
        let mapper = CoordinateMapper::new(Rect::new(0.0, 0.0, 200.0, 100.0));
        let p = mapper.to_canvas(Point::new(-50.0, 150.0));
        assert_close(p, Point::new(-0.25, 1.5));
        assert_close(mapper.to_screen(p), Point::new(-50.0, 150.0));
    }

    #[test]
    fn test_degenerate_rect_maps_to_zero() {
        let mapper = CoordinateMapper::new(Rect::new(10.0, 10.0, 10.0, 110.0));
        let p = mapper.to_canvas(Point::new(42.0, 60.0));
        assert_eq!(p.x, 0.0);
        assert!((p.y - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_contain_letterboxes_wide_image() {
        let container = Rect::new(0.0, 0.0, 800.0, 600.0);
        let rect = contain_rect(container, Size::new(1600.0, 800.0));
        assert!((rect.width() - 800.0).abs() < 1e-9);
        assert!((rect.height() - 400.0).abs() < 1e-9);
        assert!((rect.y0 - 100.0).abs() < 1e-9);

        let mapper = CoordinateMapper::contain(container, Size::new(1600.0, 800.0));
        // A click in the top letterbox band is above the image.
        assert!(mapper.to_canvas(Point::new(400.0, 50.0)).y < 0.0);
        assert_close(mapper.to_canvas(Point::new(400.0, 300.0)), Point::new(0.5, 0.5));
    }

    #[test]
    fn test_contain_with_unknown_image_size_uses_container() {
        let container = Rect::new(0.0, 0.0, 300.0, 200.0);
        assert_eq!(contain_rect(container, Size::ZERO), container);
    }
}
