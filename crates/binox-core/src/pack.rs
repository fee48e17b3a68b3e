//! RGB565 pixel packing and stereo scanout-buffer assembly.

use image::RgbImage;

/// Pack an 8-bit RGB triple into 16-bit RGB565 (red in the top 5 bits).
///
/// Channels are rounded to the nearest representable level rather than
/// truncated, which keeps the unpack round-trip within half a
/// quantization step per channel.
pub fn pack_rgb565(r: u8, g: u8, b: u8) -> u16 {
    let r5 = (r as u16 * 31 + 127) / 255;
    let g6 = (g as u16 * 63 + 127) / 255;
    let b5 = (b as u16 * 31 + 127) / 255;
    (r5 << 11) | (g6 << 5) | b5
}

/// Expand an RGB565 value back to 8-bit channels by bit replication.
pub fn unpack_rgb565(v: u16) -> [u8; 3] {
    let r5 = (v >> 11) & 0x1f;
    let g6 = (v >> 5) & 0x3f;
    let b5 = v & 0x1f;
    [
        ((r5 << 3) | (r5 >> 2)) as u8,
        ((g6 << 2) | (g6 >> 4)) as u8,
        ((b5 << 3) | (b5 >> 2)) as u8,
    ]
}

/// Pack one eye's corrected half-frame into the full stereo scanout buffer.
///
/// Each source row is emitted twice in sequence (left eye then right eye),
/// so the buffer is row-major at double width: little-endian RGB565,
/// 2 × width × height × 2 bytes total. The buffer is reused across cycles.
pub fn pack_stereo_rgb565(half: &RgbImage, out: &mut Vec<u8>) {
    let (w, h) = half.dimensions();
    out.clear();
    out.reserve((w * h * 4) as usize);

    for y in 0..h {
        for _ in 0..2 {
            for x in 0..w {
                let p = half.get_pixel(x, y).0;
                out.extend_from_slice(&pack_rgb565(p[0], p[1], p[2]).to_le_bytes());
            }
        }
    }
}
