//! On-frame status text: a 5x7 bitmap font and the fading HUD.

use image::{Rgb, RgbImage};

const TEXT_SCALE: u32 = 3;
const LINE_HEIGHT: i32 = 40;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Return a 5x7 glyph bitmap for the HUD character set.
/// Each u8 is a row; the low 5 bits are the pixels (bit 4 = leftmost).
fn glyph5x7(ch: char) -> Option<[u8; 7]> {
    macro_rules! g { ($a:expr,$b:expr,$c:expr,$d:expr,$e:expr,$f:expr,$g:expr) => {
        Some([$a,$b,$c,$d,$e,$f,$g])
    }; }

    match ch {
        // Digits 0..9
        '0' => g!(0b01110,0b10001,0b10011,0b10101,0b11001,0b10001,0b01110),
        '1' => g!(0b00100,0b01100,0b00100,0b00100,0b00100,0b00100,0b01110),
        '2' => g!(0b01110,0b10001,0b00001,0b00010,0b00100,0b01000,0b11111),
        '3' => g!(0b11110,0b00001,0b00001,0b01110,0b00001,0b00001,0b11110),
        '4' => g!(0b00010,0b00110,0b01010,0b10010,0b11111,0b00010,0b00010),
        '5' => g!(0b11111,0b10000,0b11110,0b00001,0b00001,0b10001,0b01110),
        '6' => g!(0b00110,0b01000,0b10000,0b11110,0b10001,0b10001,0b01110),
        '7' => g!(0b11111,0b00001,0b00010,0b00100,0b01000,0b01000,0b01000),
        '8' => g!(0b01110,0b10001,0b10001,0b01110,0b10001,0b10001,0b01110),
        '9' => g!(0b01110,0b10001,0b10001,0b01111,0b00001,0b00010,0b01100),

        // Uppercase letters for "Switch" and "Zoom"
        'S' => g!(0b01111,0b10000,0b10000,0b01110,0b00001,0b00001,0b11110),
        'Z' => g!(0b11111,0b00001,0b00010,0b00100,0b01000,0b10000,0b11111),

        // Lowercase letters for "witch", "oom", "reset" and the zoom suffix
        'c' => g!(0b00000,0b00000,0b01111,0b10000,0b10000,0b10000,0b01111),
        'e' => g!(0b00000,0b00000,0b01110,0b10001,0b11111,0b10000,0b01110),
        'h' => g!(0b10000,0b10000,0b11110,0b10001,0b10001,0b10001,0b10001),
        'i' => g!(0b00100,0b00000,0b01100,0b00100,0b00100,0b00100,0b01110),
        'm' => g!(0b00000,0b00000,0b11010,0b10101,0b10101,0b10101,0b10101),
        'o' => g!(0b00000,0b00000,0b01110,0b10001,0b10001,0b10001,0b01110),
        'r' => g!(0b00000,0b00000,0b10110,0b11001,0b10000,0b10000,0b10000),
        's' => g!(0b00000,0b00000,0b01111,0b10000,0b01110,0b00001,0b11110),
        't' => g!(0b01000,0b01000,0b11110,0b01000,0b01000,0b01001,0b00110),
        'w' => g!(0b00000,0b00000,0b10001,0b10001,0b10101,0b10101,0b01010),
        'x' => g!(0b00000,0b00000,0b10001,0b01010,0b00100,0b01010,0b10001),

        // Punctuation
        ' ' => g!(0b00000,0b00000,0b00000,0b00000,0b00000,0b00000,0b00000),
        ':' => g!(0b00000,0b00100,0b00000,0b00000,0b00100,0b00000,0b00000),
        '.' => g!(0b00000,0b00000,0b00000,0b00000,0b00000,0b00100,0b00000),

        _ => None,
    }
}

#[inline]
fn put_pixel(frame: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x < 0 || y < 0 {
        return;
    }
    let (x, y) = (x as u32, y as u32);
    if x >= frame.width() || y >= frame.height() {
        return;
    }
    frame.put_pixel(x, y, color);
}

/// Draw one glyph at (x, y), magnified by `scale`. Unknown characters
/// draw nothing (the caller still advances past them).
fn draw_char(frame: &mut RgbImage, x: i32, y: i32, ch: char, scale: u32, color: Rgb<u8>) {
    let Some(rows) = glyph5x7(ch) else {
        return;
    };
    let s = scale as i32;
    for (ry, rowbits) in rows.iter().enumerate() {
        for rx in 0..5i32 {
            if (rowbits & (1 << (4 - rx))) != 0 {
                for dy in 0..s {
                    for dx in 0..s {
                        put_pixel(frame, x + rx * s + dx, y + ry as i32 * s + dy, color);
                    }
                }
            }
        }
    }
}

/// Draw a text string; each glyph cell is 6 columns wide (5 + 1 spacing).
pub fn draw_text(frame: &mut RgbImage, mut x: i32, y: i32, text: &str, scale: u32, color: Rgb<u8>) {
    for ch in text.chars() {
        draw_char(frame, x, y, ch, scale, color);
        x += 6 * scale as i32;
    }
}

/// Rendered width of a string in pixels (without the trailing gap).
pub fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        0
    } else {
        n * 6 * scale - scale
    }
}

/// Fading status overlay: switch position and zoom feedback.
///
/// Lines stay visible for a fixed number of render cycles after the last
/// change, then disappear together. The timer counts cycles, not wall
/// clock, matching the render loop's cadence.
pub struct StatusHud {
    ttl_cycles: u32,
    remaining: u32,
    switch_line: Option<String>,
    zoom_line: Option<String>,
}

impl StatusHud {
    pub fn new(ttl_cycles: u32) -> Self {
        Self {
            ttl_cycles,
            remaining: 0,
            switch_line: None,
            zoom_line: None,
        }
    }

    pub fn show_switch(&mut self, position: u8) {
        self.switch_line = Some(format!("Switch: {position}"));
        self.remaining = self.ttl_cycles;
    }

    pub fn show_zoom(&mut self, factor: f32) {
        self.zoom_line = Some(format!("Zoom: {factor:.1}x"));
        self.remaining = self.ttl_cycles;
    }

    pub fn show_zoom_reset(&mut self) {
        self.zoom_line = Some("Zoom reset".to_string());
        self.remaining = self.ttl_cycles;
    }

    /// Currently visible lines, top to bottom.
    pub fn visible_lines(&self) -> Vec<&str> {
        if self.remaining == 0 {
            return Vec::new();
        }
        self.switch_line
            .iter()
            .chain(self.zoom_line.iter())
            .map(String::as_str)
            .collect()
    }

    /// Advance the fade timer by one render cycle.
    pub fn tick(&mut self) {
        if self.remaining > 0 {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.switch_line = None;
                self.zoom_line = None;
            }
        }
    }

    /// Draw the visible lines centered and stacked on `frame`.
    pub fn render(&self, frame: &mut RgbImage) {
        let lines = self.visible_lines();
        if lines.is_empty() {
            return;
        }

        let w = frame.width() as i32;
        let h = frame.height() as i32;
        let y0 = h / 2 - lines.len() as i32 * (LINE_HEIGHT / 2);

        for (i, line) in lines.iter().enumerate() {
            let tw = text_width(line, TEXT_SCALE) as i32;
            let x = (w - tw) / 2;
            let y = y0 + i as i32 * LINE_HEIGHT;
            draw_text(frame, x, y, line, TEXT_SCALE, TEXT_COLOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glyphs_cover_status_strings() {
        for text in ["Switch: 12345678", "Zoom: 12.5x", "Zoom reset"] {
            for ch in text.chars() {
                assert!(glyph5x7(ch).is_some(), "missing glyph for {ch:?}");
            }
        }
    }

    #[test]
    fn test_unknown_char_draws_nothing() {
        let mut frame = RgbImage::new(32, 32);
        draw_text(&mut frame, 4, 4, "?", 1, TEXT_COLOR);
        assert!(frame.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_draw_clips_at_frame_edges() {
        let mut frame = RgbImage::new(10, 10);
        // Partially off every edge; must not panic.
        draw_text(&mut frame, -8, -3, "88", 2, TEXT_COLOR);
        draw_text(&mut frame, 8, 8, "88", 2, TEXT_COLOR);
    }

    #[test]
    fn test_text_width() {
        assert_eq!(text_width("", 3), 0);
        assert_eq!(text_width("0", 3), 15);
        assert_eq!(text_width("00", 3), 33);
    }

    #[test]
    fn test_hud_fades_after_ttl_cycles() {
        let mut hud = StatusHud::new(3);
        hud.show_zoom(1.5);
        for cycle in 0..3 {
            assert!(
                !hud.visible_lines().is_empty(),
                "line should still show on cycle {cycle}"
            );
            hud.tick();
        }
        assert!(hud.visible_lines().is_empty(), "line should fade after ttl");
    }

    #[test]
    fn test_hud_change_restarts_timer() {
        let mut hud = StatusHud::new(5);
        hud.show_zoom(2.0);
        for _ in 0..4 {
            hud.tick();
        }
        hud.show_switch(3);
        for _ in 0..4 {
            hud.tick();
        }
        assert_eq!(hud.visible_lines(), vec!["Switch: 3", "Zoom: 2.0x"]);
    }

    #[test]
    fn test_hud_line_order_and_format() {
        let mut hud = StatusHud::new(10);
        hud.show_switch(4);
        hud.show_zoom_reset();
        assert_eq!(hud.visible_lines(), vec!["Switch: 4", "Zoom reset"]);

        hud.show_zoom(1.2);
        assert_eq!(hud.visible_lines()[1], "Zoom: 1.2x");
    }

    #[test]
    fn test_hud_renders_centered_block() {
        let mut hud = StatusHud::new(10);
        hud.show_switch(1);

        let mut frame = RgbImage::new(300, 300);
        hud.render(&mut frame);

        let lit: Vec<(u32, u32)> = frame
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0 != [0, 0, 0])
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(!lit.is_empty(), "HUD should draw something");

        // One line: block top at h/2 - 20, glyphs are 21 px tall at scale 3.
        assert!(lit.iter().all(|&(_, y)| (130..151).contains(&y)));
        // "Switch: 1" is 159 px wide, so it starts at x = 70.
        assert!(lit.iter().all(|&(x, _)| (70..230).contains(&x)));
    }
}
