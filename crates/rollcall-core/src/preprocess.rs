//! Grayscale crop and resize shared by the detector letterbox and the classifier input.

use crate::types::{BoundingBox, FaceCrop};

/// Resize a grayscale image with bilinear interpolation (pixel-center aligned).
///
/// Deterministic: identical input always produces identical output.
pub fn resize_bilinear(
    src: &[u8],
    width: usize,
    height: usize,
    new_w: usize,
    new_h: usize,
) -> Vec<u8> {
    let mut resized = vec![0u8; new_w * new_h];
    if width == 0 || height == 0 || new_w == 0 || new_h == 0 || src.len() < width * height {
        return resized;
    }

    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * width + x0] as f32;
            let tr = src[y0 * width + x1] as f32;
            let bl = src[y1 * width + x0] as f32;
            let br = src[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            resized[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    resized
}

/// Crop `bbox` out of a grayscale frame and resize it to `size` × `size`.
///
/// The box is clipped to the frame first; returns `None` if nothing remains.
pub fn crop_and_resize(
    frame: &[u8],
    width: u32,
    height: u32,
    bbox: &BoundingBox,
    size: u32,
) -> Option<FaceCrop> {
    if size == 0 || frame.len() < (width as usize) * (height as usize) {
        return None;
    }
    let (x, y, w, h) = bbox.clamp_to(width, height)?;
    let stride = width as usize;

    let mut region = Vec::with_capacity((w * h) as usize);
    for row in y..y + h {
        let start = row as usize * stride + x as usize;
        region.extend_from_slice(&frame[start..start + w as usize]);
    }

    Some(FaceCrop {
        data: resize_bilinear(&region, w as usize, h as usize, size as usize, size as usize),
        size,
    })
}

/// Wrap an already-square grayscale image as a crop, resizing to `size` if needed.
pub fn crop_from_image(data: &[u8], width: u32, height: u32, size: u32) -> Option<FaceCrop> {
    let full = BoundingBox {
        x: 0.0,
        y: 0.0,
        width: width as f32,
        height: height as f32,
        score: 1.0,
    };
    crop_and_resize(data, width, height, &full, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, score: 1.0 }
    }

    #[test]
    fn test_bilinear_resize_uniform() {
        let frame = vec![128u8; 100 * 100];
        let resized = resize_bilinear(&frame, 100, 100, 200, 200);
        assert_eq!(resized.len(), 200 * 200);
        assert!(resized.iter().all(|&p| p == 128), "uniform resize should stay uniform");
    }

    #[test]
    fn test_bilinear_resize_identity() {
        let frame: Vec<u8> = (0..64).map(|i| (i * 3) as u8).collect();
        assert_eq!(resize_bilinear(&frame, 8, 8, 8, 8), frame);
    }

    #[test]
    fn test_resize_empty_source() {
        assert_eq!(resize_bilinear(&[], 0, 0, 4, 4), vec![0u8; 16]);
    }

    #[test]
    fn test_crop_has_canonical_size() {
        let frame = vec![50u8; 640 * 480];
        for b in [bbox(10.0, 10.0, 80.0, 120.0), bbox(600.0, 400.0, 100.0, 100.0)] {
            let crop = crop_and_resize(&frame, 640, 480, &b, 112).unwrap();
            assert_eq!(crop.size(), 112);
            assert_eq!(crop.data().len(), 112 * 112);
        }
    }

    #[test]
    fn test_crop_takes_region_pixels() {
        // Left half dark, right half bright; crop only the right half.
        let (w, h) = (20u32, 10u32);
        let frame: Vec<u8> = (0..w * h).map(|i| if i % w >= 10 { 200 } else { 0 }).collect();
        let crop = crop_and_resize(&frame, w, h, &bbox(10.0, 0.0, 10.0, 10.0), 5).unwrap();
        assert!(crop.data().iter().all(|&p| p == 200));
    }

    #[test]
    fn test_crop_outside_frame() {
        let frame = vec![0u8; 100];
        assert!(crop_and_resize(&frame, 10, 10, &bbox(50.0, 50.0, 5.0, 5.0), 8).is_none());
    }

    #[test]
    fn test_crop_rejects_short_buffer() {
        let frame = vec![0u8; 10];
        assert!(crop_and_resize(&frame, 10, 10, &bbox(0.0, 0.0, 5.0, 5.0), 8).is_none());
    }

    #[test]
    fn test_crop_is_deterministic() {
        let frame: Vec<u8> = (0..(64 * 48)).map(|i| (i % 251) as u8).collect();
        let b = bbox(3.5, 7.2, 30.0, 25.0);
        let a = crop_and_resize(&frame, 64, 48, &b, 16).unwrap();
        let c = crop_and_resize(&frame, 64, 48, &b, 16).unwrap();
        assert_eq!(a.data(), c.data());
    }
}
