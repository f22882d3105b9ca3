//! Strip-chart framebuffer with change tracking.
//!
//! The graph engine draws into this RAM buffer. After a refresh only the
//! rectangle containing changed pixels is pushed to the panel.

use alloc::vec;
use alloc::vec::Vec;
use core::convert::Infallible;

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Rectangle;
use log::debug;

use crate::config::{GRAPH_HEIGHT, GRAPH_WIDTH};

/// Region touched since the last push to the panel.
#[derive(Debug, Clone, Copy)]
struct DirtyRect {
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
}

impl DirtyRect {
    fn from_point(x: usize, y: usize) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    fn expand(&mut self, x: usize, y: usize) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }
}

/// `GRAPH_WIDTH × GRAPH_HEIGHT` RGB565 pixels.
pub struct GraphBuffer {
    pixels: Vec<Rgb565>,
    dirty: Option<DirtyRect>,
}

impl Default for GraphBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuffer {
    pub const WIDTH: usize = GRAPH_WIDTH;
    pub const HEIGHT: usize = GRAPH_HEIGHT;

    pub fn new() -> Self {
        Self {
            pixels: vec![Rgb565::BLACK; GRAPH_WIDTH * GRAPH_HEIGHT],
            dirty: None,
        }
    }

    fn mark(&mut self, x: usize, y: usize) {
        match &mut self.dirty {
            Some(rect) => rect.expand(x, y),
            None => self.dirty = Some(DirtyRect::from_point(x, y)),
        }
    }

    #[inline]
    fn set_pixel(&mut self, x: usize, y: usize, color: Rgb565) {
        let idx = y * GRAPH_WIDTH + x;
        if self.pixels[idx] != color {
            self.pixels[idx] = color;
            self.mark(x, y);
        }
    }

    /// Plot a point, ignoring anything outside the buffer.
    pub fn plot(&mut self, x: i32, y: i32, color: Rgb565) {
        if x >= 0 && y >= 0 && (x as usize) < GRAPH_WIDTH && (y as usize) < GRAPH_HEIGHT {
            self.set_pixel(x as usize, y as usize, color);
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgb565> {
        if x < GRAPH_WIDTH && y < GRAPH_HEIGHT {
            Some(self.pixels[y * GRAPH_WIDTH + x])
        } else {
            None
        }
    }

    /// Raw rows, top to bottom.
    pub fn pixels(&self) -> &[Rgb565] {
        &self.pixels
    }

    /// Scroll every row `columns` pixels left and fill the vacated columns
    /// with `fill`.
    pub fn shift_left(&mut self, columns: usize, fill: Rgb565) {
        if columns == 0 {
            return;
        }
        let columns = columns.min(GRAPH_WIDTH);
        for row in self.pixels.chunks_exact_mut(GRAPH_WIDTH) {
            row.copy_within(columns.., 0);
            row[GRAPH_WIDTH - columns..].fill(fill);
        }
        self.mark(0, 0);
        self.mark(GRAPH_WIDTH - 1, GRAPH_HEIGHT - 1);
    }

    /// Bresenham line. `thickness` widens the line vertically.
    pub fn line(&mut self, from: Point, to: Point, color: Rgb565, thickness: u8) {
        let (mut x, mut y) = (from.x, from.y);
        let dx = (to.x - x).abs();
        let dy = -(to.y - y).abs();
        let sx = if x < to.x { 1 } else { -1 };
        let sy = if y < to.y { 1 } else { -1 };
        let mut err = dx + dy;
        let half = thickness.max(1) as i32 / 2;
        let extra = (thickness.max(1) as i32 - 1) - half;

        loop {
            for off in -half..=extra {
                self.plot(x, y + off, color);
            }
            if x == to.x && y == to.y {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Push the changed region to a display, then reset change tracking.
    pub fn flush<D>(&mut self, display: &mut D, origin: Point) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = Rgb565>,
    {
        let Some(rect) = self.dirty.take() else {
            return Ok(());
        };

        let width = rect.max_x - rect.min_x + 1;
        let height = rect.max_y - rect.min_y + 1;
        debug!(
            "Flushing {}x{} graph region at ({}, {})",
            width, height, rect.min_x, rect.min_y
        );

        let area = Rectangle::new(
            origin + Point::new(rect.min_x as i32, rect.min_y as i32),
            Size::new(width as u32, height as u32),
        );
        let pixels = &self.pixels;
        let colors = (rect.min_y..=rect.max_y).flat_map(move |y| {
            let start = y * GRAPH_WIDTH + rect.min_x;
            pixels[start..start + width].iter().copied()
        });
        display.fill_contiguous(&area, colors)
    }
}

impl OriginDimensions for GraphBuffer {
    fn size(&self) -> Size {
        Size::new(GRAPH_WIDTH as u32, GRAPH_HEIGHT as u32)
    }
}

impl DrawTarget for GraphBuffer {
    type Color = Rgb565;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels {
            self.plot(coord.x, coord.y, color);
        }
        Ok(())
    }

    fn fill_solid(&mut self, area: &Rectangle, color: Self::Color) -> Result<(), Self::Error> {
        let x_start = (area.top_left.x.max(0) as usize).min(GRAPH_WIDTH);
        let y_start = (area.top_left.y.max(0) as usize).min(GRAPH_HEIGHT);
        let x_end = (area.top_left.x.max(0) as usize)
            .saturating_add(area.size.width as usize)
            .min(GRAPH_WIDTH);
        let y_end = (area.top_left.y.max(0) as usize)
            .saturating_add(area.size.height as usize)
            .min(GRAPH_HEIGHT);

        for y in y_start..y_end {
            for x in x_start..x_end {
                self.set_pixel(x, y, color);
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        for y in 0..GRAPH_HEIGHT {
            for x in 0..GRAPH_WIDTH {
                self.set_pixel(x, y, color);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_endpoints_drawn() {
        let mut fb = GraphBuffer::new();
        fb.line(Point::new(0, 0), Point::new(10, 5), Rgb565::RED, 1);
        assert_eq!(fb.pixel(0, 0), Some(Rgb565::RED));
        assert_eq!(fb.pixel(10, 5), Some(Rgb565::RED));
        assert_eq!(fb.pixel(10, 0), Some(Rgb565::BLACK));
    }

    #[test]
    fn test_thick_line_widens_vertically() {
        let mut fb = GraphBuffer::new();
        fb.line(Point::new(5, 20), Point::new(15, 20), Rgb565::GREEN, 3);
        assert_eq!(fb.pixel(10, 19), Some(Rgb565::GREEN));
        assert_eq!(fb.pixel(10, 21), Some(Rgb565::GREEN));
        assert_eq!(fb.pixel(10, 22), Some(Rgb565::BLACK));
    }

    #[test]
    fn test_shift_left_scrolls_rows() {
        let mut fb = GraphBuffer::new();
        fb.plot(5, 7, Rgb565::BLUE);
        fb.plot(GRAPH_WIDTH as i32 - 1, 0, Rgb565::RED);
        fb.shift_left(1, Rgb565::BLACK);
        assert_eq!(fb.pixel(4, 7), Some(Rgb565::BLUE));
        assert_eq!(fb.pixel(5, 7), Some(Rgb565::BLACK));
        assert_eq!(fb.pixel(GRAPH_WIDTH - 2, 0), Some(Rgb565::RED));
        assert_eq!(fb.pixel(GRAPH_WIDTH - 1, 0), Some(Rgb565::BLACK));

        fb.shift_left(3, Rgb565::BLACK);
        assert_eq!(fb.pixel(1, 7), Some(Rgb565::BLUE));
        assert_eq!(fb.pixel(GRAPH_WIDTH - 5, 0), Some(Rgb565::RED));
        assert_eq!(fb.pixel(GRAPH_WIDTH - 4, 0), Some(Rgb565::BLACK));
    }

    #[test]
    fn test_out_of_bounds_plot_ignored() {
        let mut fb = GraphBuffer::new();
        fb.plot(-1, 0, Rgb565::RED);
        fb.plot(0, GRAPH_HEIGHT as i32, Rgb565::RED);
        assert!(fb.pixels().iter().all(|&p| p == Rgb565::BLACK));
    }
}
