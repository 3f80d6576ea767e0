//! Driver for the Sharp memory LCD (LS027B7DH01, 400x240, 1 bpp).

use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Rectangle;
use embedded_hal::{blocking::spi::Write as SpiWrite, digital::v2::OutputPin};

pub const WIDTH: usize = 400;
pub const HEIGHT: usize = 240;
const WIDTH_BYTES: usize = WIDTH.div_ceil(8);
const HEIGHT_BYTES: usize = HEIGHT.div_ceil(8);

const UPDATE_BIT: u8 = 0b0000_0001;
const VCOM_BIT: u8 = 0b0000_0010;
const CLEAR_BIT: u8 = 0b0000_0100;

// A set bit is a white (reflective) pixel
const WHITE_ROW: [u8; WIDTH_BYTES] = [0xFF; WIDTH_BYTES];

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum DisplayError<S, P> {
    #[error("SPI write failed")]
    Spi(S),
    #[error("chip select failed")]
    Pin(P),
}

type Result<T, SPI, CS> =
    core::result::Result<T, DisplayError<<SPI as SpiWrite<u8>>::Error, <CS as OutputPin>::Error>>;

/// One chip-select window. Every transaction flips VCOM, which keeps the
/// panel from building up a DC bias.
struct SpiTransaction<'a, SPI, CS> {
    spi: &'a mut SPI,
    cs: &'a mut CS,
}

impl<'a, SPI, CS> SpiTransaction<'a, SPI, CS>
where
    SPI: SpiWrite<u8>,
    CS: OutputPin,
{
    fn start(disp: &'a mut SharpMemDisplayDriver<SPI, CS>, command: u8) -> Result<Self, SPI, CS> {
        disp.vcom = !disp.vcom;
        let command = command | if disp.vcom { VCOM_BIT } else { 0 };
        // Chip select is active high on this panel
        disp.cs.set_high().map_err(DisplayError::Pin)?;
        Self {
            spi: &mut disp.spi,
            cs: &mut disp.cs,
        }
        .send(&[command])
    }

    fn send(self, data: &[u8]) -> Result<Self, SPI, CS> {
        self.spi.write(data).map_err(DisplayError::Spi)?;
        Ok(self)
    }

    fn finish(self) -> Result<(), SPI, CS> {
        self.cs.set_low().map_err(DisplayError::Pin)
    }
}

pub struct SharpMemDisplayDriver<SPI, CS> {
    spi: SPI,
    cs: CS,
    vcom: bool,
}

impl<SPI, CS> SharpMemDisplayDriver<SPI, CS>
where
    SPI: SpiWrite<u8>,
    CS: OutputPin,
{
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self { spi, cs, vcom: false }
    }

    fn start(&mut self, command: u8) -> Result<SpiTransaction<'_, SPI, CS>, SPI, CS> {
        SpiTransaction::start(self, command)
    }

    pub fn clear(&mut self) -> Result<(), SPI, CS> {
        self.start(CLEAR_BIT)?.send(&[0x00])?.finish()
    }

    /// Sends only the VCOM flip. Needed at least once a second while the
    /// picture is static.
    pub fn toggle_vcom(&mut self) -> Result<(), SPI, CS> {
        self.start(0)?.send(&[0x00])?.finish()
    }

    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

/// Frame buffer in front of the driver. Only lines whose contents changed
/// since the last flush go over the wire.
pub struct SharpMemDisplay<SPI, CS> {
    buf: [[u8; WIDTH_BYTES]; HEIGHT],
    dirty: [u8; HEIGHT_BYTES],
    dirty_any: bool,
    driver: SharpMemDisplayDriver<SPI, CS>,
}

impl<SPI, CS> SharpMemDisplay<SPI, CS>
where
    SPI: SpiWrite<u8>,
    CS: OutputPin,
{
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self {
            buf: [WHITE_ROW; HEIGHT],
            dirty: [0; HEIGHT_BYTES],
            dirty_any: false,
            driver: SharpMemDisplayDriver::new(spi, cs),
        }
    }

    fn mark_dirty(&mut self, y: usize) {
        self.dirty[y / 8] |= 1u8 << (y % 8);
        self.dirty_any = true;
    }

    pub fn draw_pixel(&mut self, x: usize, y: usize, white: bool) {
        if x >= WIDTH || y >= HEIGHT {
            return;
        }
        let byte = &mut self.buf[y][x / 8];
        let old = *byte;
        if white {
            *byte |= 1u8 << (x % 8);
        } else {
            *byte &= !(1u8 << (x % 8));
        }
        if *byte != old {
            self.mark_dirty(y);
        }
    }

    pub fn flush(&mut self) -> Result<(), SPI, CS> {
        // Nothing changed, nothing to send
        if !self.dirty_any {
            return Ok(());
        }
        let dirty = self.dirty;
        self.buf
            .iter()
            .enumerate()
            .filter(|(y, _)| dirty[y / 8] & (1u8 << (y % 8)) != 0)
            .try_fold(self.driver.start(UPDATE_BIT)?, |trn, (y, row)| {
                // Gate lines are numbered from 1
                trn.send(&[y as u8 + 1])? // address byte
                    .send(row)? // row data
                    .send(&[0x00]) // spacing byte
            })?
            .send(&[0x00])? // termination byte
            .finish()?;

        self.dirty = [0; HEIGHT_BYTES];
        self.dirty_any = false;
        Ok(())
    }

    /// Blanks the panel immediately and resets the frame buffer to white.
    pub fn clear(&mut self) -> Result<(), SPI, CS> {
        self.driver.clear()?;
        self.buf = [WHITE_ROW; HEIGHT];
        self.dirty = [0; HEIGHT_BYTES];
        self.dirty_any = false;
        Ok(())
    }

    pub fn toggle_vcom(&mut self) -> Result<(), SPI, CS> {
        self.driver.toggle_vcom()
    }

    pub fn has_pending(&self) -> bool {
        self.dirty_any
    }

    pub fn release(self) -> (SPI, CS) {
        self.driver.release()
    }
}

impl<SPI, CS> DrawTarget for SharpMemDisplay<SPI, CS>
where
    SPI: SpiWrite<u8>,
    CS: OutputPin,
{
    type Color = BinaryColor;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> core::result::Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(pos, color) in pixels {
            if pos.x < 0 || pos.y < 0 {
                continue;
            }
            self.draw_pixel(pos.x as usize, pos.y as usize, color.is_off());
        }
        Ok(())
    }

    // Whole-frame clears happen every render, so only rows that differ are marked
    fn clear(&mut self, color: Self::Color) -> core::result::Result<(), Self::Error> {
        let fill = [if color.is_off() { 0xFF } else { 0x00 }; WIDTH_BYTES];
        for y in 0..HEIGHT {
            if self.buf[y] != fill {
                self.buf[y] = fill;
                self.mark_dirty(y);
            }
        }
        Ok(())
    }
}

impl<SPI, CS> Dimensions for SharpMemDisplay<SPI, CS> {
    fn bounding_box(&self) -> Rectangle {
        Rectangle::new(Point::zero(), Size::new(WIDTH as u32, HEIGHT as u32))
    }
}
