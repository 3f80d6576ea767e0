use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle},
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{Circle, Polyline, PrimitiveStyle},
    text::{Baseline, Text},
};

use crate::viewport::{DrawCommand, DrawCommands};

const MARKER_DIAMETER: u32 = 7;
const TRACK_WIDTH: u32 = 1;

/// Something that can put a frame's draw commands on screen.
pub trait DisplaySurface {
    type Error;

    /// Clears the surface and draws every command in order.
    fn draw_commands<const N: usize>(&mut self, commands: &DrawCommands<N>) -> Result<(), Self::Error>;
}

impl<D> DisplaySurface for D
where
    D: DrawTarget<Color = BinaryColor>,
{
    type Error = D::Error;

    fn draw_commands<const N: usize>(&mut self, commands: &DrawCommands<N>) -> Result<(), Self::Error> {
        self.clear(BinaryColor::Off)?;
        for command in commands.iter() {
            match command {
                DrawCommand::Polyline(points) => {
                    Polyline::new(points)
                        .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, TRACK_WIDTH))
                        .draw(self)?;
                }
                DrawCommand::Marker(center) => {
                    Circle::with_center(center, MARKER_DIAMETER)
                        .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
                        .draw(self)?;
                }
                DrawCommand::Text { origin, text } => {
                    Text::with_baseline(text, origin, MonoTextStyle::new(&FONT_6X10, BinaryColor::On), Baseline::Top)
                        .draw(self)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RenderConfig,
        path::{PathBuffer, PathPoint},
        viewport::ViewportRenderer,
    };
    use embedded_graphics::mock_display::MockDisplay;

    fn display() -> MockDisplay<BinaryColor> {
        let mut display = MockDisplay::new();
        display.set_allow_overdraw(true);
        display.set_allow_out_of_bounds_drawing(true);
        display
    }

    #[test]
    fn draws_track_and_marker() {
        let mut path = PathBuffer::<4>::new();
        for (x, y) in [(0.0, 0.0), (100.0, 0.0), (100.0, 100.0)] {
            path.push(PathPoint {
                x,
                y,
                ..Default::default()
            });
        }
        let mut renderer = ViewportRenderer::new(RenderConfig::default());
        let commands = renderer.render(&path, Size::new(64, 64));
        let marker = commands.marker().unwrap();

        let mut display = display();
        display.draw_commands(&commands).unwrap();

        assert_eq!(display.get_pixel(marker), Some(BinaryColor::On));
        let first = commands.polyline()[0];
        assert_eq!(display.get_pixel(first), Some(BinaryColor::On));
        // Far corner is background
        assert_eq!(display.get_pixel(Point::new(0, 63)), Some(BinaryColor::Off));
    }

    #[test]
    fn placeholder_is_text_only() {
        let mut renderer = ViewportRenderer::new(RenderConfig::default());
        let commands = renderer.render(&PathBuffer::<4>::new(), Size::new(64, 64));

        let mut display = display();
        display.draw_commands(&commands).unwrap();

        // "NO FIX" sits around the middle
        let lit = (14..50).flat_map(|x| (27..37).map(move |y| Point::new(x, y)));
        assert!(lit.into_iter().any(|p| display.get_pixel(p) == Some(BinaryColor::On)));
        // Marker-free: nothing lit in the bottom rows
        for x in 0..64 {
            assert_ne!(display.get_pixel(Point::new(x, 60)), Some(BinaryColor::On));
        }
    }
}
