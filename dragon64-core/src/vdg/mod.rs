// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

//! The 6847 Video Display Generator. Owns only mode decode and the
//! scanline state machine; actual pixel synthesis and palette lookup are
//! left to the host renderer, which this crate reaches only through the
//! emit callback.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::util::Pin;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Resolution {
    Text,
    SemiGraphics,
    Graphics,
}

/// Color-burst phase indicator passed with each emitted scanline, so an
/// NTSC renderer can pick the artifact palette without re-deriving mode
/// state.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum BurstPhase {
    Normal,
    Shifted,
}

/// `GM2 GM1 GM0 GnA CSS INT/EXT` decoded into a renderer-friendly shape.
#[derive(Clone, Copy)]
pub struct Mode {
    pub gm: u8,
    pub graphics: bool,
    pub css: bool,
    pub external_charset: bool,
}

impl Mode {
    /// Decode from PIA1 port B, which is how both Dragon and CoCo drive
    /// the mode pins: PB3 CSS, PB4 GM0, PB5 GM1, PB6 GM2, PB7 GnA.
    pub fn from_pia_bits(value: u8) -> Mode {
        Mode {
            gm: (value >> 4) & 0x07,
            graphics: value & 0x80 != 0,
            css: value & 0x08 != 0,
            external_charset: false,
        }
    }

    pub fn resolution(&self) -> Resolution {
        if !self.graphics {
            Resolution::Text
        } else if self.gm == 0 {
            Resolution::SemiGraphics
        } else {
            Resolution::Graphics
        }
    }

    pub fn bits_per_pixel(&self) -> u8 {
        match self.resolution() {
            Resolution::Text | Resolution::SemiGraphics => 1,
            Resolution::Graphics => 2,
        }
    }

    /// The highest-resolution graphics mode with CSS set is the one whose
    /// burst the 6847 shifts, producing the famous artifact colours.
    pub fn burst_phase(&self) -> BurstPhase {
        if self.graphics && self.css && self.gm == 0x07 {
            BurstPhase::Shifted
        } else {
            BurstPhase::Normal
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode {
            gm: 0,
            graphics: false,
            css: false,
            external_charset: false,
        }
    }
}

const VISIBLE_SCANLINES: u32 = 192;
const TOTAL_SCANLINES: u32 = 262;

pub struct Vdg {
    mode: Mode,
    scanline: u32,
    pub hs: Pin,
    pub fs: Pin,
}

impl Vdg {
    pub fn new() -> Self {
        Self {
            mode: Mode::default(),
            scanline: 0,
            hs: Pin::new_high(),
            fs: Pin::new_high(),
        }
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn reset(&mut self) {
        self.mode = Mode::default();
        self.scanline = 0;
        self.hs = Pin::new_high();
        self.fs = Pin::new_high();
    }

    /// Advances one scanline, invoking `fetch_row` for this row's bytes
    /// and `emit` to hand the finished row to the renderer. HS pulses on
    /// every line, visible or not; FS drops at the start of vertical blank
    /// and rises again at the top of the next field.
    pub fn advance_scanline(
        &mut self,
        mut fetch_row: impl FnMut(Resolution, u8) -> Vec<u8>,
        mut emit: impl FnMut(&[u8], BurstPhase),
    ) {
        self.hs.set_active(true);
        if self.scanline < VISIBLE_SCANLINES {
            let row = fetch_row(self.mode.resolution(), self.mode.bits_per_pixel());
            emit(&row, self.mode.burst_phase());
        }
        self.hs.set_active(false);
        self.scanline += 1;
        if self.scanline == VISIBLE_SCANLINES {
            self.fs.set_active(false);
        }
        if self.scanline >= TOTAL_SCANLINES {
            self.scanline = 0;
            self.fs.set_active(true);
        }
    }

    pub fn scanline(&self) -> u32 {
        self.scanline
    }
}

impl Default for Vdg {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hs_goes_low_after_visible_row() {
        let mut vdg = Vdg::new();
        assert!(vdg.hs.is_high());
        vdg.advance_scanline(|_, _| Vec::new(), |_, _| {});
        assert!(vdg.hs.is_low());
    }

    #[test]
    fn fs_drops_at_vblank_and_rises_at_field_top() {
        let mut vdg = Vdg::new();
        for _ in 0..VISIBLE_SCANLINES {
            vdg.advance_scanline(|_, _| Vec::new(), |_, _| {});
        }
        assert!(vdg.fs.is_low());
        for _ in VISIBLE_SCANLINES..TOTAL_SCANLINES {
            vdg.advance_scanline(|_, _| Vec::new(), |_, _| {});
        }
        assert!(vdg.fs.is_high());
        assert_eq!(0, vdg.scanline());
    }

    #[test]
    fn mode_decode_from_pia_port_bits() {
        let mode = Mode::from_pia_bits(0b1111_1000); // GnA, GM=7, CSS
        assert_eq!(Resolution::Graphics, mode.resolution());
        assert_eq!(BurstPhase::Shifted, mode.burst_phase());
        let text = Mode::from_pia_bits(0b0000_0000);
        assert_eq!(Resolution::Text, text.resolution());
        assert_eq!(1, text.bits_per_pixel());
        assert_eq!(BurstPhase::Normal, text.burst_phase());
    }
}
