use jpeg_decoder::Decoder;

use super::frame::{PixelFormat, RawFrame};
use crate::error::{Error, Result};

/// Convert a raw frame into packed RGB24 pixels.
pub fn decode_frame(frame: &RawFrame) -> Result<Vec<u8>> {
    match frame.format {
        PixelFormat::Mjpeg => {
            let mut decoder = Decoder::new(frame.data.as_ref());
            let pixels = decoder
                .decode()
                .map_err(|e| Error::Encode(format!("mjpeg decode: {e}")))?;
            Ok(pixels)
        }
        PixelFormat::Rgb24 => {
            check_len(frame)?;
            Ok(frame.data.to_vec())
        }
        PixelFormat::Yuyv4 => {
            check_len(frame)?;
            Ok(yuyv_to_rgb(&frame.data))
        }
    }
}

/// Read the dimensions from a JPEG header without decoding the scan data.
pub fn jpeg_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    let mut decoder = Decoder::new(data);
    decoder
        .read_info()
        .map_err(|e| Error::Encode(format!("invalid jpeg header: {e}")))?;
    let info = decoder
        .info()
        .ok_or_else(|| Error::Encode("jpeg header carries no frame info".into()))?;
    Ok((u32::from(info.width), u32::from(info.height)))
}

fn check_len(frame: &RawFrame) -> Result<()> {
    let bpp = frame.format.bytes_per_pixel().unwrap_or(0);
    let expected = frame.width as usize * frame.height as usize * bpp;
    if expected == 0 || frame.data.len() != expected {
        return Err(Error::Encode(format!(
            "{:?} buffer is {} bytes, expected {} for {}x{}",
            frame.format,
            frame.data.len(),
            expected,
            frame.width,
            frame.height
        )));
    }
    Ok(())
}

/// BT.601 YUYV (4:2:2) to RGB24.
pub fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        push_rgb(&mut rgb, y0, u, v);
        push_rgb(&mut rgb, y1, u, v);
    }
    rgb
}

fn push_rgb(out: &mut Vec<u8>, y: u8, u: u8, v: u8) {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    out.push(r.clamp(0, 255) as u8);
    out.push(g.clamp(0, 255) as u8);
    out.push(b.clamp(0, 255) as u8);
}
